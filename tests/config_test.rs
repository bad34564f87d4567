// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use std::io::Write;

use novarocks_hashagg::hashagg_config::{self, HashAggConfig};
use novarocks_hashagg::novarocks_logging;
use novarocks_hashagg::{BufferAllocator, BufferManager, HashTableOptions};

const CONFIG: &str = r#"
log_level = "warn"

[hash_table]
initial_capacity = 100
block_size_bytes = 8192
max_load_factor = 0.75
scan_batch_size = 128

[memory]
limit_bytes = 65536
"#;

#[test]
fn config_file_drives_table_options_and_memory_limit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("novarocks_hashagg.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    drop(file);

    let loaded = HashAggConfig::load_from_file(&path).unwrap();
    assert_eq!(loaded.log_level, "warn");
    assert_eq!(loaded.hash_table.string_heap_block_size_bytes, 65_536);

    let cfg = hashagg_config::init_from_path(&path).unwrap();
    assert_eq!(cfg.hash_table.initial_capacity, 100);
    novarocks_logging::init();

    let options = HashTableOptions::from_config();
    assert_eq!(options.initial_capacity, 100);
    assert_eq!(options.directory_capacity(), 128);
    assert_eq!(options.block_size_bytes, 8192);
    assert_eq!(options.max_load_factor, 0.75);
    assert_eq!(options.scan_batch_size, 128);

    let manager = BufferManager::from_config();
    assert_eq!(manager.mem_tracker().limit(), 65_536);
    assert!(manager.acquire(100_000).is_err());
}

#[test]
fn missing_or_invalid_files_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let err = HashAggConfig::load_from_file(&dir.path().join("absent.toml")).unwrap_err();
    assert!(format!("{err:#}").contains("absent.toml"), "{err:#}");

    let bad = dir.path().join("bad.toml");
    std::fs::write(&bad, "[hash_table]\nmax_load_factor = 0.0\n").unwrap();
    let err = HashAggConfig::load_from_file(&bad).unwrap_err();
    assert!(format!("{err:#}").contains("max_load_factor"), "{err:#}");
}
