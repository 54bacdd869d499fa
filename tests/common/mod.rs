//! Shared test fixtures
//!
//! The engine's only outbound dependency is the Exegol CLI, reached through
//! the configurable `exegol_path`. These tests swap in a stub script that
//! emulates the CLI surface the engine drives: `exec -v <container>
//! <command>` runs the command in a local shell, `info` prints a container
//! table, and a made-up container name fails the way the real CLI does.

// Not every test binary uses every fixture
#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use exrun::EngineConfig;

pub const STUB_SCRIPT: &str = r#"#!/bin/sh
case "$1" in
  exec)
    container="$3"
    cmd="$4"
    if [ "$container" = "missing" ]; then
      echo "Error: container 'missing' not found" >&2
      exit 1
    fi
    if [ "$container" = "box2" ]; then
      echo "Error: container 'box2' is not running" >&2
      exit 1
    fi
    if [ "$cmd" = "/bin/bash" ]; then
      exec /bin/sh
    fi
    exec sh -c "$cmd"
    ;;
  info)
    printf 'NAME STATUS IMAGE CREATED\n'
    printf 'box1 running full:latest 2024-01-15\n'
    printf 'box2 stopped web:latest 2024-02-20\n'
    ;;
  --version)
    echo 'Exegol v4.3.1'
    ;;
  *)
    exit 2
    ;;
esac
"#;

/// Write the stub CLI into `dir` and return its path.
pub fn write_stub(dir: &Path) -> String {
    let path = dir.join("exegol");
    std::fs::write(&path, STUB_SCRIPT).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_str().unwrap().to_string()
}

/// Default config wired to the stub CLI.
pub fn stub_config(dir: &Path) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.exegol_path = write_stub(dir);
    config
}
