// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command line of the `weed mount` helper.

use crate::domain::mount::MountArgs;

/// Render resolved mount arguments as the helper's argv (without the binary).
pub fn mount_argv(args: &MountArgs) -> Vec<String> {
    let mut argv = vec![
        "mount".to_string(),
        "-dirAutoCreate=true".to_string(),
        "-umask=000".to_string(),
        format!("-dir={}", args.target.display()),
        format!("-localSocket={}", args.local_socket.display()),
        format!("-cacheDir={}", args.cache_dir.display()),
        format!("-collection={}", args.collection),
        format!("-filer={}", args.filers.join(",")),
        format!("-filer.path={}", args.filer_path),
        format!("-cacheCapacityMB={}", args.cache_capacity_mb),
    ];

    if args.concurrent_writers > 0 {
        argv.push(format!("-concurrentWriters={}", args.concurrent_writers));
    }
    if let Some(replication) = &args.replication {
        argv.push(format!("-replication={}", replication));
    }
    if let Some(disk) = &args.disk_type {
        argv.push(format!("-disk={}", disk));
    }
    if let Some(uid_map) = &args.uid_map {
        argv.push(format!("-map.uid={}", uid_map));
    }
    if let Some(gid_map) = &args.gid_map {
        argv.push(format!("-map.gid={}", gid_map));
    }
    if let Some(dc) = &args.data_center {
        argv.push(format!("-dataCenter={}", dc));
    }
    if args.read_only {
        argv.push("-readOnly".to_string());
    }
    argv
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mount::{MountDefaults, MountTarget};
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn resolve(context: &[(&str, &str)], read_only: bool) -> MountArgs {
        let defaults = MountDefaults {
            filers: vec!["filer-0:8888".to_string(), "filer-1:8888".to_string()],
            ..MountDefaults::default()
        };
        let target = MountTarget {
            volume_id: "vol-1".to_string(),
            target: PathBuf::from("/stage/vol-1"),
            cache_dir: PathBuf::from("/cache/h"),
            local_socket: PathBuf::from("/run/h.sock"),
            read_only,
        };
        let context: HashMap<String, String> = context
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        MountArgs::resolve(&defaults, target, &context).unwrap()
    }

    #[test]
    fn test_base_arguments() {
        let argv = mount_argv(&resolve(&[], false));
        assert_eq!(
            &argv[..10],
            &[
                "mount",
                "-dirAutoCreate=true",
                "-umask=000",
                "-dir=/stage/vol-1",
                "-localSocket=/run/h.sock",
                "-cacheDir=/cache/h",
                "-collection=vol-1",
                "-filer=filer-0:8888,filer-1:8888",
                "-filer.path=/buckets/vol-1",
                "-cacheCapacityMB=1000",
            ]
        );
        assert!(argv.contains(&"-concurrentWriters=32".to_string()));
        assert!(!argv.contains(&"-readOnly".to_string()));
    }

    #[test]
    fn test_optional_arguments() {
        let argv = mount_argv(&resolve(
            &[
                ("replication", "010"),
                ("diskType", "ssd"),
                ("map.gid", "100:0"),
                ("dataLocality", "write_preferLocalDc"),
                ("dataCenter", "dc2"),
            ],
            true,
        ));
        for expected in ["-replication=010", "-disk=ssd", "-map.gid=100:0", "-dataCenter=dc2"] {
            assert!(argv.contains(&expected.to_string()), "missing {}", expected);
        }
        assert_eq!(argv.last().unwrap(), "-readOnly");
    }
}
