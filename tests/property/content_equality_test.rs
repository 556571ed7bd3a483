// tests/property/content_equality_test.rs

//! Property-based tests for content equality: every node reads exactly the bytes
//! of the file, whatever the chunk size and read sizes.

use crate::test_helpers::{TestCluster, assert_all_equal, test_io_config};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32, // Each case starts a whole group
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_all_nodes_read_identical_content(
        content in prop::collection::vec(any::<u8>(), 0..12_000),
        chunk_size in 1usize..8192,
        read_sizes in prop::collection::vec(1usize..10_000, 1..8),
        followers in 0usize..4,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("content.bin");
        std::fs::write(&path, &content).unwrap();
        let path = path.to_str().unwrap().to_string();

        let rt = tokio::runtime::Runtime::new().unwrap();
        let results = rt.block_on(async {
            let mut io = test_io_config();
            io.chunk_size = chunk_size;
            let cluster = TestCluster::with_io(followers, io);
            cluster
                .run(move |session| {
                    let path = path.clone();
                    let read_sizes = read_sizes.clone();
                    async move {
                        let mut file = session.open_file(&path).await.unwrap();
                        let mut read = Vec::new();
                        // Cycle through the read sizes until end-of-stream.
                        for max in read_sizes.iter().cycle() {
                            let chunk = file.read(*max).await.unwrap();
                            if chunk.is_empty() {
                                break;
                            }
                            assert!(chunk.len() <= *max);
                            read.extend_from_slice(&chunk);
                        }
                        file.close().await.unwrap();
                        read
                    }
                })
                .await
        });

        let read = assert_all_equal(&results);
        prop_assert_eq!(read, content);
    }

    #[test]
    fn test_rewound_content_matches_first_pass(
        content in prop::collection::vec(any::<u8>(), 1..20_000),
        split in 0usize..20_000,
        chunk_size in 1usize..4096,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rewind.bin");
        std::fs::write(&path, &content).unwrap();
        let path = path.to_str().unwrap().to_string();
        let split = split.min(content.len()).max(1);

        let rt = tokio::runtime::Runtime::new().unwrap();
        let results = rt.block_on(async {
            let mut io = test_io_config();
            io.chunk_size = chunk_size;
            let cluster = TestCluster::with_io(2, io);
            cluster
                .run(move |session| {
                    let path = path.clone();
                    async move {
                        let mut file = session.open_file(&path).await.unwrap();
                        // Read part of the stream, rewind, then read everything.
                        let mut prefix = 0;
                        while prefix < split {
                            let chunk = file.read(split - prefix).await.unwrap();
                            if chunk.is_empty() {
                                break;
                            }
                            prefix += chunk.len();
                        }
                        file.rewind().unwrap();
                        file.read_to_end().await.unwrap().to_vec()
                    }
                })
                .await
        });

        let read = assert_all_equal(&results);
        prop_assert_eq!(read, content);
    }
}
