use std::io::{Cursor, Write};

use ruzip::{
    CaseSensitivity, EntryFilters, EntryInfo, EntryKind, Method, SortKey, SortSpec, ZipArchive,
    ZipDirectory, ZipWriter,
};

fn tree_archive() -> ZipArchive<Cursor<Vec<u8>>> {
    let mut writer = ZipWriter::create(Cursor::new(Vec::new())).unwrap();

    // note: src/ has no explicit directory entry, it only exists as a
    // prefix of deeper paths
    let files: &[(&str, &[u8])] = &[
        ("README.md", b"# tree"),
        ("src/lib.rs", b"pub fn lib() {}"),
        ("src/bin/main.rs", b"fn main() {}"),
        ("assets/logo.png", b"png"),
        ("notes.txt", b"n"),
    ];
    for (path, payload) in files {
        let mut info = EntryInfo::file(*path);
        info.method = Method::Store;
        let mut entry = writer.open_entry(info).unwrap();
        entry.write_all(payload).unwrap();
        entry.finish().unwrap();
    }
    writer
        .open_entry(EntryInfo::directory("assets"))
        .unwrap()
        .finish()
        .unwrap();

    ZipArchive::new(writer.finish().unwrap().into_inner()).unwrap()
}

fn names(entries: &[EntryInfo]) -> Vec<String> {
    entries
        .iter()
        .map(|e| e.path.trim_end_matches('/').rsplit('/').next().unwrap().to_string())
        .collect()
}

#[test]
fn root_listing_synthesizes_directories() {
    let mut archive = tree_archive();
    let mut dir = ZipDirectory::new(&mut archive);

    let entries = dir
        .entries(&[], EntryFilters::default(), SortSpec::by(SortKey::Name))
        .unwrap();
    assert_eq!(names(&entries), vec!["README.md", "assets", "notes.txt", "src"]);

    // src only exists implicitly, assets explicitly; both list as dirs
    let src = entries.iter().find(|e| e.path == "src/").unwrap();
    assert_eq!(src.kind, EntryKind::Directory);
    let assets = entries.iter().find(|e| e.path == "assets/").unwrap();
    assert_eq!(assets.kind, EntryKind::Directory);
}

#[test]
fn cd_navigation() {
    let mut archive = tree_archive();
    let mut dir = ZipDirectory::new(&mut archive);

    assert!(dir.cd("src").unwrap());
    assert_eq!(dir.path(), "src/");

    assert!(dir.cd("bin/").unwrap());
    assert_eq!(dir.path(), "src/bin/");

    assert!(dir.cd("..").unwrap());
    assert_eq!(dir.path(), "src/");

    assert!(dir.cd("/assets").unwrap());
    assert_eq!(dir.path(), "assets/");

    assert!(dir.cd("/").unwrap());
    assert_eq!(dir.path(), "");

    // a nonexistent directory doesn't move the view
    assert!(!dir.cd("nope").unwrap());
    assert_eq!(dir.path(), "");
}

#[test]
fn listing_below_base() {
    let mut archive = tree_archive();
    let mut dir = ZipDirectory::with_path(&mut archive, "src").unwrap();

    let entries = dir
        .entries(&[], EntryFilters::default(), SortSpec::by(SortKey::Name))
        .unwrap();
    assert_eq!(names(&entries), vec!["bin", "lib.rs"]);
}

#[test]
fn type_filters() {
    let mut archive = tree_archive();
    let mut dir = ZipDirectory::new(&mut archive);

    let files = dir
        .entries(&[], EntryFilters::FILES, SortSpec::by(SortKey::Name))
        .unwrap();
    assert_eq!(names(&files), vec!["README.md", "notes.txt"]);

    let dirs = dir
        .entries(&[], EntryFilters::DIRS, SortSpec::by(SortKey::Name))
        .unwrap();
    assert_eq!(names(&dirs), vec!["assets", "src"]);
}

#[test]
fn name_filters_glob() {
    let mut archive = tree_archive();
    let mut dir = ZipDirectory::new(&mut archive);

    let md = dir
        .entries(&["*.md"], EntryFilters::FILES, SortSpec::default())
        .unwrap();
    assert_eq!(names(&md), vec!["README.md"]);

    let ci = dir
        .entries(
            &["readme.*"],
            EntryFilters::FILES | EntryFilters::CASE_INSENSITIVE,
            SortSpec::default(),
        )
        .unwrap();
    assert_eq!(names(&ci), vec!["README.md"]);
}

#[test]
fn sort_modifiers() {
    let mut archive = tree_archive();
    let mut dir = ZipDirectory::new(&mut archive);

    let spec = SortSpec {
        key: SortKey::Name,
        dirs_first: true,
        ..Default::default()
    };
    let entries = dir.entries(&[], EntryFilters::default(), spec).unwrap();
    assert_eq!(names(&entries), vec!["assets", "src", "README.md", "notes.txt"]);

    let spec = SortSpec {
        key: SortKey::Name,
        reversed: true,
        ..Default::default()
    };
    let entries = dir.entries(&[], EntryFilters::default(), spec).unwrap();
    assert_eq!(names(&entries), vec!["src", "notes.txt", "assets", "README.md"]);

    let spec = SortSpec {
        key: SortKey::Size,
        ..Default::default()
    };
    let files = dir.entries(&[], EntryFilters::FILES, spec).unwrap();
    assert_eq!(names(&files), vec!["notes.txt", "README.md"]);
}

#[test]
fn sort_by_extension() {
    let mut writer = ZipWriter::create(Cursor::new(Vec::new())).unwrap();
    for path in ["b.rs", "a.txt", "c.md"] {
        let mut info = EntryInfo::file(path);
        info.method = Method::Store;
        let mut e = writer.open_entry(info).unwrap();
        e.write_all(b"x").unwrap();
        e.finish().unwrap();
    }
    let mut archive = ZipArchive::new(writer.finish().unwrap().into_inner()).unwrap();
    let mut dir = ZipDirectory::new(&mut archive);

    let entries = dir
        .entries(&[], EntryFilters::FILES, SortSpec::by(SortKey::Type))
        .unwrap();
    assert_eq!(names(&entries), vec!["c.md", "b.rs", "a.txt"]);
}

#[test]
fn exists_and_count() {
    let mut archive = tree_archive();
    let mut dir = ZipDirectory::new(&mut archive);

    assert!(dir.exists("src/lib.rs").unwrap());
    assert!(dir.exists("src").unwrap());
    assert!(!dir.exists("src/nope.rs").unwrap());

    assert_eq!(dir.count(&[], EntryFilters::default()).unwrap(), 4);

    assert!(dir.cd("src").unwrap());
    assert_eq!(dir.count(&[], EntryFilters::default()).unwrap(), 2);
}

#[test]
fn case_sensitivity_override_in_lookup() {
    let mut archive = tree_archive();
    assert!(archive
        .find_entry("readme.md", CaseSensitivity::Insensitive)
        .unwrap()
        .is_some());
}
