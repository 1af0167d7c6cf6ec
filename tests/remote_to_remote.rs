#[cfg(test)]
mod common;

#[cfg(test)]
mod tests {
    use common::*;

    use super::*;

    #[tokio::test]
    async fn remote_to_remote_remaps_prefix() {
        TestHelper::init_dummy_tracing_subscriber();

        let helper = TestHelper::new();
        helper.put_test_data(BUCKET1, "src/");
        helper.storage.insert_object(BUCKET1, "other/data1", "other");

        let result = helper
            .sync(
                vec![],
                &format!("r2://{BUCKET1}/src/"),
                &format!("r2://{BUCKET2}/dst"),
            )
            .await;

        assert!(result.is_ok);
        assert!(!result.has_error);
        assert_eq!(result.stats.sync_complete, 5);
        assert_eq!(helper.storage.call_counts().copy_object, 5);
        assert_eq!(helper.storage.call_counts().get_object, 0);

        assert_eq!(
            helper.storage.keys(BUCKET2),
            vec![
                "dst/data1",
                "dst/dir1/data1",
                "dst/dir2/data2",
                "dst/dir21/data1",
                "dst/dir5/data3",
            ]
        );
        for (key, content) in TEST_FILES {
            assert_eq!(
                helper
                    .storage
                    .object_data(BUCKET2, &format!("dst/{key}"))
                    .unwrap(),
                content.as_bytes()
            );
        }
    }

    #[tokio::test]
    async fn remote_to_remote_twice_transfers_nothing() {
        TestHelper::init_dummy_tracing_subscriber();

        let helper = TestHelper::new();
        helper.put_test_data(BUCKET1, "");

        let source = format!("r2://{BUCKET1}");
        let target = format!("r2://{BUCKET2}/backup/");

        helper.sync(vec![], &source, &target).await;
        helper.storage.reset_call_counts();

        let result = helper.sync(vec![], &source, &target).await;
        assert!(result.is_ok);
        assert_eq!(result.stats.sync_complete, 0);
        assert_eq!(result.stats.sync_skip, 5);
        assert_eq!(helper.storage.call_counts().copy_object, 0);
    }

    #[tokio::test]
    async fn remote_to_remote_copies_changed_objects() {
        TestHelper::init_dummy_tracing_subscriber();

        let helper = TestHelper::new();
        helper.put_test_data(BUCKET1, "");
        helper.put_test_data(BUCKET2, "");
        helper
            .storage
            .insert_object(BUCKET1, "dir1/data1", "changed content");

        let result = helper
            .sync(
                vec![],
                &format!("r2://{BUCKET1}"),
                &format!("r2://{BUCKET2}"),
            )
            .await;

        assert!(result.is_ok);
        assert_eq!(result.stats.sync_complete, 1);
        assert_eq!(result.stats.sync_skip, 4);
        assert_eq!(
            helper.storage.object_data(BUCKET2, "dir1/data1").unwrap(),
            "changed content".as_bytes()
        );
    }

    #[tokio::test]
    async fn remote_to_remote_multipart_e_tag_is_compared_as_is() {
        TestHelper::init_dummy_tracing_subscriber();

        let helper = TestHelper::new();
        let multipart_e_tag = "\"9be3303e9a8d67a0f1e609fb7a29030a-4\"";
        helper
            .storage
            .insert_object_with_e_tag(BUCKET1, "large_file", "data", multipart_e_tag);
        helper
            .storage
            .insert_object_with_e_tag(BUCKET2, "large_file", "data", multipart_e_tag);

        let result = helper
            .sync(
                vec![],
                &format!("r2://{BUCKET1}"),
                &format!("r2://{BUCKET2}"),
            )
            .await;

        assert!(result.is_ok);
        assert_eq!(result.stats.sync_complete, 0);
        assert_eq!(result.stats.sync_skip, 1);
    }

    #[tokio::test]
    async fn remote_to_remote_within_same_bucket() {
        TestHelper::init_dummy_tracing_subscriber();

        let helper = TestHelper::new();
        helper.put_test_data(BUCKET1, "a/");

        let result = helper
            .sync(
                vec![],
                &format!("r2://{BUCKET1}/a/"),
                &format!("r2://{BUCKET1}/b/"),
            )
            .await;

        assert!(result.is_ok);
        assert_eq!(result.stats.sync_complete, 5);
        assert_eq!(helper.storage.keys(BUCKET1).len(), 10);
        assert!(helper.storage.object_data(BUCKET1, "b/dir5/data3").is_some());
    }

    #[tokio::test]
    async fn remote_to_remote_listing_failure_aborts() {
        TestHelper::init_dummy_tracing_subscriber();

        let helper = TestHelper::with_storage(
            r2sync::storage::memory::MemoryStorage::new()
                .with_bucket(BUCKET1)
                .with_bucket(BUCKET2)
                .with_page_size(2),
        );
        helper.put_test_data(BUCKET1, "");
        helper.storage.fail_list_page_call(2);

        let result = helper
            .sync(
                vec![],
                &format!("r2://{BUCKET1}"),
                &format!("r2://{BUCKET2}"),
            )
            .await;

        assert!(!result.is_ok);
        assert_eq!(helper.storage.call_counts().copy_object, 0);
        assert!(helper.storage.keys(BUCKET2).is_empty());
    }
}
