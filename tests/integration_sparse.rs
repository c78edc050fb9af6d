// Sparse view over a populated filesystem

use tierfs::{
	ErrorCode, IncludeCheckerOptions, MkdirOptions, ReadOptions, SparseReaddirOptions,
	SparseView, WriteOptions,
};

mod common;

async fn populated() -> tierfs::Filesystem {
	let fs = common::memory_fs().await;
	fs.mkdir("/app/src/components", MkdirOptions { recursive: true, mode: None })
		.await
		.unwrap();
	fs.mkdir("/app/node_modules/pkg", MkdirOptions { recursive: true, mode: None })
		.await
		.unwrap();
	fs.write("/app/src/main.ts", "main", WriteOptions::default()).await.unwrap();
	fs.write("/app/src/components/button.ts", "button", WriteOptions::default())
		.await
		.unwrap();
	fs.write("/app/node_modules/pkg/index.js", "dep", WriteOptions::default())
		.await
		.unwrap();
	fs.write("/app/readme.md", "docs", WriteOptions::default()).await.unwrap();
	fs
}

fn sparse(fs: tierfs::Filesystem, patterns: &[&str], excludes: &[&str]) -> SparseView {
	SparseView::new(
		fs,
		IncludeCheckerOptions {
			patterns: patterns.iter().map(|s| s.to_string()).collect(),
			exclude_patterns: excludes.iter().map(|s| s.to_string()).collect(),
			cone: false,
			cache_size: None,
		},
	)
	.unwrap()
}

#[tokio::test]
async fn test_excluded_paths_surface_enoent() {
	let fs = populated().await;
	let view = sparse(fs, &["**"], &["node_modules"]);

	let err = view
		.read("/app/node_modules/pkg/index.js", ReadOptions::default())
		.await
		.unwrap_err();
	assert_eq!(err.code(), Some(ErrorCode::Enoent));
	assert!(!view.exists("/app/node_modules/pkg/index.js").await.unwrap());

	// visible paths behave normally
	assert_eq!(
		view.read_to_string("/app/src/main.ts", ReadOptions::default()).await.unwrap(),
		"main"
	);
	assert!(view.stat("/app/src/main.ts").await.unwrap().is_file());
}

#[tokio::test]
async fn test_narrow_include_set() {
	let fs = populated().await;
	let view = sparse(fs, &["app/src/**"], &[]);

	assert!(view.exists("/app/src/components/button.ts").await.unwrap());
	assert!(!view.exists("/app/readme.md").await.unwrap());
}

#[tokio::test]
async fn test_recursive_listing_prunes_excluded_dirs() {
	let fs = populated().await;
	let view = sparse(fs, &["**"], &["node_modules"]);

	let page = view
		.readdir(
			"/app",
			SparseReaddirOptions {
				base: tierfs::ReaddirOptions { recursive: true, ..Default::default() },
				..Default::default()
			},
		)
		.await
		.unwrap();
	let paths: Vec<String> = page.entries.iter().map(|d| d.path()).collect();
	assert!(paths.contains(&"/app/src/main.ts".to_string()));
	assert!(paths.contains(&"/app/src/components/button.ts".to_string()));
	assert!(!paths.iter().any(|p| p.contains("node_modules")));
}

#[tokio::test]
async fn test_listing_filters_intersect() {
	let fs = populated().await;
	let view = sparse(fs, &["**"], &[]);

	let page = view
		.readdir(
			"/app/src",
			SparseReaddirOptions {
				filter: Some("*.ts".to_string()),
				entry_type: Some(tierfs::metadata::EntryKind::File),
				..Default::default()
			},
		)
		.await
		.unwrap();
	let names: Vec<&str> = page.entries.iter().map(|d| d.name.as_str()).collect();
	assert_eq!(names, vec!["main.ts"]);
}

#[tokio::test]
async fn test_cone_view() {
	let fs = common::memory_fs().await;
	fs.mkdir("/packages/core/src", MkdirOptions { recursive: true, mode: None })
		.await
		.unwrap();
	fs.mkdir("/packages/other", MkdirOptions { recursive: true, mode: None }).await.unwrap();
	fs.write("/packages/core/src/index.ts", "core", WriteOptions::default()).await.unwrap();
	fs.write("/packages/core/readme.md", "about", WriteOptions::default()).await.unwrap();
	fs.write("/packages/other/index.ts", "other", WriteOptions::default()).await.unwrap();
	fs.write("/top.json", "{}", WriteOptions::default()).await.unwrap();

	let view = SparseView::new(
		fs,
		IncludeCheckerOptions {
			patterns: vec!["packages/core/src/".to_string()],
			exclude_patterns: Vec::new(),
			cone: true,
			cache_size: None,
		},
	)
	.unwrap();

	assert!(view.exists("/packages/core/src/index.ts").await.unwrap());
	assert!(view.exists("/packages/core/readme.md").await.unwrap());
	assert!(view.exists("/top.json").await.unwrap());
	assert!(!view.exists("/packages/other/index.ts").await.unwrap());
}

#[tokio::test]
async fn test_symlinks_through_the_view() {
	let fs = populated().await;
	fs.symlink("/app/src/main.ts", "/app/src/link.ts").await.unwrap();
	let view = sparse(fs, &["app/src/**"], &[]);

	assert_eq!(view.readlink("/app/src/link.ts").await.unwrap(), "/app/src/main.ts");
	assert_eq!(view.realpath("/app/src/link.ts").await.unwrap(), "/app/src/main.ts");
	assert!(view.lstat("/app/src/link.ts").await.unwrap().is_symlink());
}
