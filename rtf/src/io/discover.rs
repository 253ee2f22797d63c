//! Compile a case directory into a [`Project`].
//!
//! One depth-first walk over the filesystem. Directories starting with `_`
//! are ignored, entries are visited in name order, and children are sorted by
//! their numeric prefix afterwards.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use crate::core::path::name_and_order;
use crate::core::tags::{Tags, parse_tags};
use crate::io::script::find_script;
use crate::tree::{
    GROUP_FILE_NAME, Group, Node, POST_TEST_FILE_NAME, PRE_TEST_FILE_NAME, Project,
    ProjectScripts, TEST_FILE_NAME, Test,
};

const IGNORE_PREFIX: char = '_';

/// Build the project rooted at `case_dir`.
#[instrument(skip_all, fields(case_dir = %case_dir.display()))]
pub fn discover(case_dir: &Path) -> Result<Project> {
    let root_path = fs::canonicalize(case_dir)
        .with_context(|| format!("resolve case directory {}", case_dir.display()))?;
    if !root_path.is_dir() {
        return Err(anyhow!("{} is not a directory", case_dir.display()));
    }
    let base = root_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("case directory {} has no name", root_path.display()))?;
    let (order, local_name) = name_and_order(&base);

    let group_file = find_script(&root_path, GROUP_FILE_NAME);
    let tags = read_tags(group_file.as_deref())?;
    let scripts = ProjectScripts {
        pre_test: find_script(&root_path, PRE_TEST_FILE_NAME),
        post_test: find_script(&root_path, POST_TEST_FILE_NAME),
    };
    let mut root = Group::root(
        root_path.clone(),
        local_name,
        order,
        tags,
        group_file,
        scripts,
    );
    populate(&mut root)?;
    debug!(root = %root.name, children = root.children.len(), "discovered project");
    Ok(Project::new(root))
}

/// A directory is a group if it has a group script or any subdirectory that
/// is not ignored.
// `_`-prefixed subdirectories do not count, so a test keeping fixtures in `_data/` stays a test.
pub fn is_group(dir: &Path) -> Result<bool> {
    if find_script(dir, GROUP_FILE_NAME).is_some() {
        return Ok(true);
    }
    Ok(!subdirectories(dir)?.is_empty())
}

/// The test script of `dir`, if it is a test directory.
pub fn test_script(dir: &Path) -> Option<PathBuf> {
    find_script(dir, TEST_FILE_NAME)
}

fn populate(group: &mut Group) -> Result<()> {
    for (dir_name, path) in subdirectories(&group.path)? {
        let (order, local_name) = name_and_order(&dir_name);
        if is_group(&path)? {
            let group_file = find_script(&path, GROUP_FILE_NAME);
            let tags = read_tags(group_file.as_deref())?;
            let mut child = Group::child(group, path, local_name, order, tags, group_file);
            populate(&mut child)?;
            group.children.push(Node::Group(child));
        } else if let Some(test_file) = test_script(&path) {
            let tags = read_tags(Some(&test_file))?;
            let test = Test::new(group, path, local_name, order, tags, test_file);
            debug!(test = %test.name, order, "discovered test");
            group.children.push(Node::Test(Arc::new(test)));
        } else {
            debug!(path = %path.display(), "skipping directory without group or test script");
        }
    }
    group.sort_children();
    Ok(())
}

/// Subdirectories of `dir` in name order, skipping ignored names.
fn subdirectories(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let entries = fs::read_dir(dir).with_context(|| format!("read directory {}", dir.display()))?;
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        let file_type = entry
            .file_type()
            .with_context(|| format!("stat {}", entry.path().display()))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !file_type.is_dir() || name.starts_with(IGNORE_PREFIX) {
            continue;
        }
        dirs.push((name, entry.path()));
    }
    dirs.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(dirs)
}

/// Tags of `script`; a group without a script has empty tags. Invalid UTF-8
/// is replaced rather than rejected.
fn read_tags(script: Option<&Path>) -> Result<Tags> {
    let Some(script) = script else {
        return Ok(Tags::default());
    };
    let bytes = fs::read(script).with_context(|| format!("read {}", script.display()))?;
    let contents = String::from_utf8_lossy(&bytes);
    parse_tags(&contents).with_context(|| format!("parse tags in {}", script.display()))
}
