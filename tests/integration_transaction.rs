// Transaction semantics: atomicity, savepoints, blob lifecycle, recovery log

use tierfs::{
	ErrorCode, FsError, MkdirOptions, ReadOptions, TransactionOptions, TransactionStatus,
	WriteOptions,
};

mod common;

#[tokio::test]
async fn test_rollback_undoes_writes_and_logs_status() {
	let fs = common::memory_fs().await;
	let result: tierfs::Result<()> = fs
		.with_transaction(|fs| {
			Box::pin(async move {
				fs.write("/a", "1", WriteOptions::default()).await?;
				assert!(fs.exists("/a").await?);
				Err(FsError::invalid("forced failure"))
			})
		})
		.await;
	assert!(result.is_err());
	assert!(!fs.exists("/a").await.unwrap());

	let log = fs.transaction_log(10).await.unwrap();
	assert_eq!(log.last().unwrap().status, TransactionStatus::RolledBack);
}

#[tokio::test]
async fn test_commit_makes_every_effect_visible() {
	let fs = common::memory_fs().await;
	fs.with_transaction(|fs| {
		Box::pin(async move {
			fs.mkdir("/batch", MkdirOptions::default()).await?;
			fs.write("/batch/one", "1", WriteOptions::default()).await?;
			fs.write("/batch/two", "2", WriteOptions::default()).await?;
			fs.rename("/batch/two", "/batch/renamed").await?;
			Ok(())
		})
	})
	.await
	.unwrap();

	assert!(fs.exists("/batch/one").await.unwrap());
	assert!(fs.exists("/batch/renamed").await.unwrap());
	assert!(!fs.exists("/batch/two").await.unwrap());

	let log = fs.transaction_log(10).await.unwrap();
	assert_eq!(log.last().unwrap().status, TransactionStatus::Committed);
}

#[tokio::test]
async fn test_savepoint_rollback_keeps_outer_work() {
	let fs = common::memory_fs().await;
	fs.begin_transaction(TransactionOptions::default()).await.unwrap();
	fs.write("/outer", "kept", WriteOptions::default()).await.unwrap();

	fs.begin_transaction(TransactionOptions::default()).await.unwrap();
	fs.write("/inner", "dropped", WriteOptions::default()).await.unwrap();
	assert!(fs.exists("/inner").await.unwrap());
	fs.rollback_transaction().await.unwrap();

	assert!(!fs.exists("/inner").await.unwrap());
	assert!(fs.exists("/outer").await.unwrap());

	fs.commit_transaction().await.unwrap();
	assert_eq!(
		fs.read_to_string("/outer", ReadOptions::default()).await.unwrap(),
		"kept"
	);
}

#[tokio::test]
async fn test_append_visible_within_transaction() {
	let fs = common::memory_fs().await;
	fs.write("/log", "a", WriteOptions::default()).await.unwrap();
	fs.with_transaction(|fs| {
		Box::pin(async move {
			fs.append("/log", "b", WriteOptions::default()).await?;
			// reads inside the transaction observe the appended bytes
			let text = fs.read_to_string("/log", ReadOptions::default()).await?;
			assert_eq!(text, "ab");
			Ok(())
		})
	})
	.await
	.unwrap();
	assert_eq!(fs.read_to_string("/log", ReadOptions::default()).await.unwrap(), "ab");
}

#[tokio::test]
async fn test_no_orphan_blobs_after_rollback_across_tiers() {
	let (fs, warm, _cold) = common::tiny_tiered_fs(8, 1024).await;

	// committed warm blob
	fs.write("/kept", vec![1u8; 100], WriteOptions::default()).await.unwrap();
	assert_eq!(warm.len().await, 1);

	// rolled-back warm blob must be reversed out of the object store
	let result: tierfs::Result<()> = fs
		.with_transaction(|fs| {
			Box::pin(async move {
				fs.write("/doomed", vec![2u8; 200], WriteOptions::default()).await?;
				Err(FsError::invalid("abort"))
			})
		})
		.await;
	assert!(result.is_err());
	assert_eq!(warm.len().await, 1);
	assert!(fs.verify_integrity().await.unwrap().is_clean());
}

#[tokio::test]
async fn test_deferred_remote_delete_applies_only_on_commit() {
	let (fs, warm, _cold) = common::tiny_tiered_fs(8, 1024).await;
	fs.write("/w", vec![1u8; 100], WriteOptions::default()).await.unwrap();
	assert_eq!(warm.len().await, 1);

	// deleting inside a rolled-back transaction keeps the blob
	let result: tierfs::Result<()> = fs
		.with_transaction(|fs| {
			Box::pin(async move {
				fs.unlink("/w").await?;
				Err(FsError::invalid("abort"))
			})
		})
		.await;
	assert!(result.is_err());
	assert!(fs.exists("/w").await.unwrap());
	assert_eq!(warm.len().await, 1);
	assert_eq!(fs.read("/w", ReadOptions::default()).await.unwrap(), vec![1u8; 100]);

	// a committed delete releases the remote payload
	fs.unlink("/w").await.unwrap();
	assert_eq!(warm.len().await, 0);
	assert!(fs.verify_integrity().await.unwrap().is_clean());
}

#[tokio::test]
async fn test_transaction_timeout_surfaces_ebusy() {
	let fs = common::memory_fs().await;
	fs.begin_transaction(TransactionOptions {
		timeout: Some(std::time::Duration::from_millis(50)),
	})
	.await
	.unwrap();
	fs.write("/pending", "x", WriteOptions::default()).await.unwrap();

	tokio::time::sleep(std::time::Duration::from_millis(100)).await;
	let err = fs.write("/late", "y", WriteOptions::default()).await.unwrap_err();
	assert_eq!(err.code(), Some(ErrorCode::Ebusy));

	// the expired transaction rolled back in full
	assert!(!fs.exists("/pending").await.unwrap());
	let log = fs.transaction_log(10).await.unwrap();
	assert_eq!(log.last().unwrap().status, TransactionStatus::RolledBack);
}

#[tokio::test]
async fn test_watch_events_flush_only_after_commit() {
	let fs = common::memory_fs().await;
	let mut stream = fs
		.watch("/", tierfs::WatchOptions { recursive: true, ..Default::default() })
		.await
		.unwrap();

	fs.begin_transaction(TransactionOptions::default()).await.unwrap();
	fs.write("/staged", "x", WriteOptions::default()).await.unwrap();
	// nothing is delivered while the transaction is open
	tokio::time::sleep(std::time::Duration::from_millis(120)).await;
	assert!(stream.try_next().is_none());

	fs.commit_transaction().await.unwrap();
	let event = tokio::time::timeout(std::time::Duration::from_millis(500), stream.next())
		.await
		.expect("event after commit")
		.expect("stream open");
	assert_eq!(event.path, "/staged");
}

#[tokio::test]
async fn test_rolled_back_mutations_emit_no_events() {
	let fs = common::memory_fs().await;
	let mut stream = fs
		.watch("/", tierfs::WatchOptions { recursive: true, ..Default::default() })
		.await
		.unwrap();

	let result: tierfs::Result<()> = fs
		.with_transaction(|fs| {
			Box::pin(async move {
				fs.write("/ghost", "x", WriteOptions::default()).await?;
				Err(FsError::invalid("abort"))
			})
		})
		.await;
	assert!(result.is_err());

	tokio::time::sleep(std::time::Duration::from_millis(150)).await;
	assert!(stream.try_next().is_none());
}
