use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use kiln::{
    Cache, CacheStrategy, Engine, EngineConfig, Error, FileCache, FileFetcher, LoadError, Loader,
    TemplateFetcher, Vars,
};

fn write(dir: &Path, name: &str, content: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn touch(dir: &Path, name: &str, time: SystemTime) {
    let file = fs::File::options().write(true).open(dir.join(name)).unwrap();
    file.set_modified(time).unwrap();
}

fn engine(templates: &Path, cache: &Path, strategy: CacheStrategy) -> Engine {
    Engine::with_config(EngineConfig {
        cache_strategy: strategy,
        ..EngineConfig::default()
    })
    .with_fetcher(FileFetcher::new([templates]))
    .with_cache(FileCache::new(cache))
}

#[test]
fn file_fetcher_searches_paths_in_order() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    write(second.path(), "only_second.tt", "second");
    write(first.path(), "both.tt", "first");
    write(second.path(), "both.tt", "second");

    let fetcher = FileFetcher::new([first.path(), second.path()]);
    assert_eq!(fetcher.fetch("both.tt").unwrap().content, "first");
    assert_eq!(fetcher.fetch("only_second.tt").unwrap().content, "second");
    assert!(matches!(
        fetcher.fetch("missing.tt"),
        Err(LoadError::NotFound { .. })
    ));
}

#[test]
fn absolute_include_is_rejected() {
    let templates = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let target = templates.path().join("secret.tt");
    write(templates.path(), "secret.tt", "secret");

    let source = format!("[% INCLUDE '{}' %]", target.display());
    let err = engine(templates.path(), cache.path(), CacheStrategy::Verify)
        .render("page.tt", &source, &Vars::new())
        .unwrap_err();
    assert!(matches!(err, Error::Load(LoadError::AbsolutePath { .. })));
}

#[test]
fn parent_directory_include_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let templates = root.path().join("templates");
    write(root.path(), "secret.tt", "secret");
    write(&templates, "page.tt", "[% INCLUDE '../secret.tt' %]");

    let err = engine(&templates, cache.path(), CacheStrategy::Verify)
        .render_template("page.tt", &Vars::new())
        .unwrap_err();
    assert!(matches!(err, Error::Load(LoadError::ParentDir { .. })));
}

#[test]
fn includes_from_subdirectories() {
    let templates = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    write(templates.path(), "page.tt", "[% INCLUDE 'parts/nav.tt' WITH here = 'home' %]");
    write(templates.path(), "parts/nav.tt", "nav:[% here %]");

    let out = engine(templates.path(), cache.path(), CacheStrategy::Verify)
        .render_template("page.tt", &Vars::new())
        .unwrap();
    assert_eq!(out, "nav:home");

    let cached = FileCache::new(cache.path());
    assert!(cached.path_for("page.tt").exists());
    assert!(cached.path_for("parts/nav.tt").exists());
}

#[test]
fn verify_strategy_picks_up_changes() {
    let templates = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    write(templates.path(), "a.tt", "old");

    let engine = engine(templates.path(), cache.path(), CacheStrategy::Verify);
    assert_eq!(engine.render_template("a.tt", &Vars::new()).unwrap(), "old");

    write(templates.path(), "a.tt", "new");
    touch(
        templates.path(),
        "a.tt",
        SystemTime::now() + Duration::from_secs(3600),
    );
    assert_eq!(engine.render_template("a.tt", &Vars::new()).unwrap(), "new");
}

#[test]
fn no_verify_strategy_serves_stale_bytecode() {
    let templates = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    write(templates.path(), "a.tt", "old");

    let engine = engine(templates.path(), cache.path(), CacheStrategy::NoVerify);
    assert_eq!(engine.render_template("a.tt", &Vars::new()).unwrap(), "old");

    write(templates.path(), "a.tt", "new");
    touch(
        templates.path(),
        "a.tt",
        SystemTime::now() + Duration::from_secs(3600),
    );
    assert_eq!(engine.render_template("a.tt", &Vars::new()).unwrap(), "old");
}

#[test]
fn cache_survives_a_new_engine() {
    let templates = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    write(templates.path(), "a.tt", "[% 6 * 7 %]");

    let first = engine(templates.path(), cache.path(), CacheStrategy::NoVerify)
        .loader()
        .load("a.tt")
        .unwrap();

    fs::remove_file(templates.path().join("a.tt")).unwrap();
    let engine = engine(templates.path(), cache.path(), CacheStrategy::NoVerify);
    let second = engine.loader().load("a.tt").unwrap();
    assert_eq!(first.ops, second.ops);
    assert_eq!(engine.render_template("a.tt", &Vars::new()).unwrap(), "42");
}

#[test]
fn never_strategy_skips_the_cache() {
    let templates = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    write(templates.path(), "a.tt", "x");

    let engine = engine(templates.path(), cache.path(), CacheStrategy::Never);
    assert_eq!(engine.render_template("a.tt", &Vars::new()).unwrap(), "x");
    assert!(FileCache::new(cache.path()).get("a.tt").is_none());
}

#[test]
fn file_cache_stores_postcard_bytecode() {
    let cache_dir = tempfile::tempdir().unwrap();
    let cache = FileCache::new(cache_dir.path());
    let bc = Engine::new().compile("t.tt", "[% IF a %]b[% END %]").unwrap();
    cache.set("t.tt", Arc::new(bc.clone())).unwrap();

    let bytes = fs::read(cache.path_for("t.tt")).unwrap();
    assert_eq!(bytes, bc.to_bytes().unwrap());
    assert_eq!(*cache.get("t.tt").unwrap(), bc);
}
