//! In-memory test tree: groups, tests and the group commands around them.
//!
//! The tree is built once by [`crate::io::discover`] and is read-only
//! afterwards. Names are composed at construction time, so a node never needs
//! to reach back to its parent.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use crate::core::labels::{LabelSet, check_label, matches_pattern, merge_into, parse_labels};
use crate::core::path::child_name;
use crate::core::shard::calculate_shard;
use crate::core::tags::Tags;
use crate::core::types::{Info, RunResult};
use crate::error::ConfigError;
use crate::schedule::{self, RunConfig};

/// Script base names recognised in the case tree.
pub const GROUP_FILE_NAME: &str = "group";
pub const TEST_FILE_NAME: &str = "test";
pub const PRE_TEST_FILE_NAME: &str = "pre-test";
pub const POST_TEST_FILE_NAME: &str = "post-test";

/// Project-wide hooks, found only in the case root and shared by every test.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectScripts {
    pub pre_test: Option<PathBuf>,
    pub post_test: Option<PathBuf>,
}

/// Anything that can be listed and run.
pub trait TestContainer {
    /// Sort key among siblings.
    fn order(&self) -> i64;

    /// Listing entries for this node and its descendants.
    fn list(&self, config: &RunConfig) -> Vec<Info>;

    /// Run this node, appending every result to `results` as it completes.
    ///
    /// On error `results` still holds everything gathered before the abort.
    fn run(&self, config: &RunConfig, results: &mut Vec<RunResult>) -> Result<()>;
}

/// A directory with a `group` script, or the case root.
#[derive(Debug)]
pub struct Group {
    pub path: PathBuf,
    /// Dotted canonical name, e.g. `root.apps.basic`.
    pub name: String,
    pub order: i64,
    pub tags: Tags,
    pub group_file: Option<PathBuf>,
    /// Labels declared on this group only. Used for the group's own check.
    pub labels: LabelSet,
    pub not_labels: LabelSet,
    /// Own labels plus every ancestor's, handed down to tests.
    pub inherited_labels: LabelSet,
    pub inherited_not_labels: LabelSet,
    pub scripts: Arc<ProjectScripts>,
    pub children: Vec<Node>,
}

impl Group {
    /// The top-level group. `local_name` is the case directory's local name.
    pub fn root(
        path: PathBuf,
        local_name: &str,
        order: i64,
        tags: Tags,
        group_file: Option<PathBuf>,
        scripts: ProjectScripts,
    ) -> Self {
        let (labels, not_labels) = parse_labels(&tags.labels);
        Self {
            path,
            name: local_name.to_string(),
            order,
            inherited_labels: labels.clone(),
            inherited_not_labels: not_labels.clone(),
            labels,
            not_labels,
            tags,
            group_file,
            scripts: Arc::new(scripts),
            children: Vec::new(),
        }
    }

    /// A subgroup of `parent`. Children are attached by the caller.
    pub fn child(
        parent: &Group,
        path: PathBuf,
        local_name: &str,
        order: i64,
        tags: Tags,
        group_file: Option<PathBuf>,
    ) -> Self {
        let (labels, not_labels) = parse_labels(&tags.labels);
        let mut inherited_labels = parent.inherited_labels.clone();
        merge_into(&mut inherited_labels, &labels);
        let mut inherited_not_labels = parent.inherited_not_labels.clone();
        merge_into(&mut inherited_not_labels, &not_labels);
        Self {
            path,
            name: child_name(&parent.name, local_name),
            order,
            tags,
            group_file,
            labels,
            not_labels,
            inherited_labels,
            inherited_not_labels,
            scripts: Arc::clone(&parent.scripts),
            children: Vec::new(),
        }
    }

    /// Sort children by order. The sort is stable, so equal orders keep
    /// discovery order.
    pub fn sort_children(&mut self) {
        self.children.sort_by_key(TestContainer::order);
    }

    /// Whether this group passes the label, pattern and shard filters.
    pub fn will_run(&self, config: &RunConfig) -> bool {
        if !check_label(
            &self.labels,
            &self.not_labels,
            &config.labels,
            &config.not_labels,
        ) {
            return false;
        }
        if !matches_pattern(&self.name, &config.test_pattern, true) {
            return false;
        }
        match &config.restrict_to_tests {
            Some(allowed) => {
                let prefix = format!("{}.", self.name);
                allowed.iter().any(|name| name.starts_with(&prefix))
            }
            None => true,
        }
    }

    /// The init or deinit command, if this group has a group script.
    pub fn command(&self, kind: CommandKind) -> Option<GroupCommand> {
        self.group_file.as_ref().map(|script| GroupCommand {
            kind,
            group: self.name.clone(),
            path: self.path.clone(),
            script: script.clone(),
        })
    }

    fn info(&self, will_run: bool) -> Info {
        Info {
            name: self.name.clone(),
            will_run,
            summary: self.tags.summary.clone(),
            issue: self.tags.issue.clone(),
            labels: self.labels.clone(),
            not_labels: self.not_labels.clone(),
        }
    }
}

impl TestContainer for Group {
    fn order(&self) -> i64 {
        self.order
    }

    fn list(&self, config: &RunConfig) -> Vec<Info> {
        if !self.will_run(config) {
            return vec![self.info(false)];
        }
        self.children
            .iter()
            .flat_map(|child| child.list(config))
            .collect()
    }

    fn run(&self, config: &RunConfig, results: &mut Vec<RunResult>) -> Result<()> {
        schedule::run_group(self, config, results)
    }
}

/// A directory with a `test` script.
#[derive(Debug)]
pub struct Test {
    pub path: PathBuf,
    pub name: String,
    /// Canonical name of the owning group.
    pub parent: String,
    pub order: i64,
    pub tags: Tags,
    pub test_file: PathBuf,
    /// Own labels merged with every ancestor group's labels.
    pub labels: LabelSet,
    pub not_labels: LabelSet,
    pub scripts: Arc<ProjectScripts>,
}

impl Test {
    pub fn new(
        parent: &Group,
        path: PathBuf,
        local_name: &str,
        order: i64,
        tags: Tags,
        test_file: PathBuf,
    ) -> Self {
        let (own_labels, own_not_labels) = parse_labels(&tags.labels);
        let mut labels = parent.inherited_labels.clone();
        merge_into(&mut labels, &own_labels);
        let mut not_labels = parent.inherited_not_labels.clone();
        merge_into(&mut not_labels, &own_not_labels);
        Self {
            path,
            name: child_name(&parent.name, local_name),
            parent: parent.name.clone(),
            order,
            tags,
            test_file,
            labels,
            not_labels,
            scripts: Arc::clone(&parent.scripts),
        }
    }

    /// Number of iterations to run.
    pub fn repeat(&self) -> u32 {
        self.tags.repeat.filter(|repeat| *repeat > 0).unwrap_or(1)
    }

    pub fn will_run(&self, config: &RunConfig) -> bool {
        if !check_label(
            &self.labels,
            &self.not_labels,
            &config.labels,
            &config.not_labels,
        ) {
            return false;
        }
        if !matches_pattern(&self.name, &config.test_pattern, false) {
            return false;
        }
        config
            .restrict_to_tests
            .as_ref()
            .is_none_or(|allowed| allowed.contains(&self.name))
    }
}

impl TestContainer for Arc<Test> {
    fn order(&self) -> i64 {
        self.order
    }

    fn list(&self, config: &RunConfig) -> Vec<Info> {
        vec![Info {
            name: self.name.clone(),
            will_run: self.will_run(config),
            summary: self.tags.summary.clone(),
            issue: self.tags.issue.clone(),
            labels: self.labels.clone(),
            not_labels: self.not_labels.clone(),
        }]
    }

    fn run(&self, config: &RunConfig, results: &mut Vec<RunResult>) -> Result<()> {
        schedule::run_test(self, config, results)
    }
}

/// Child of a group.
#[derive(Debug)]
pub enum Node {
    Group(Group),
    Test(Arc<Test>),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Node::Group(group) => &group.name,
            Node::Test(test) => &test.name,
        }
    }
}

impl TestContainer for Node {
    fn order(&self) -> i64 {
        match self {
            Node::Group(group) => group.order(),
            Node::Test(test) => test.order(),
        }
    }

    fn list(&self, config: &RunConfig) -> Vec<Info> {
        match self {
            Node::Group(group) => group.list(config),
            Node::Test(test) => test.list(config),
        }
    }

    fn run(&self, config: &RunConfig, results: &mut Vec<RunResult>) -> Result<()> {
        match self {
            Node::Group(group) => group.run(config, results),
            Node::Test(test) => test.run(config, results),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Init,
    Deinit,
}

impl CommandKind {
    /// Argument passed to the group script.
    pub fn arg(self) -> &'static str {
        match self {
            CommandKind::Init => "init",
            CommandKind::Deinit => "deinit",
        }
    }
}

/// The group script invoked with `init` or `deinit`.
#[derive(Debug, Clone)]
pub struct GroupCommand {
    pub kind: CommandKind,
    /// Canonical name of the owning group.
    pub group: String,
    /// Working directory.
    pub path: PathBuf,
    pub script: PathBuf,
}

impl TestContainer for GroupCommand {
    fn order(&self) -> i64 {
        match self.kind {
            CommandKind::Init => 0,
            CommandKind::Deinit => 1,
        }
    }

    fn list(&self, _config: &RunConfig) -> Vec<Info> {
        vec![Info {
            name: format!("{}::{}", self.group, self.kind.arg()),
            will_run: true,
            summary: String::new(),
            issue: String::new(),
            labels: LabelSet::new(),
            not_labels: LabelSet::new(),
        }]
    }

    fn run(&self, config: &RunConfig, results: &mut Vec<RunResult>) -> Result<()> {
        schedule::run_group_command(self, config, results)
    }
}

/// A discovered case tree plus its shard selection.
#[derive(Debug)]
pub struct Project {
    pub root: Group,
    /// 1-based shard index; `0` when not sharded.
    pub shard: usize,
    pub total_shards: usize,
}

impl Project {
    pub fn new(root: Group) -> Self {
        Self {
            root,
            shard: 0,
            total_shards: 0,
        }
    }

    /// Restrict runs to shard `shard` of `total`. A total of `1` (or `0`)
    /// disables sharding.
    pub fn set_shard(&mut self, shard: usize, total: usize) -> Result<(), ConfigError> {
        if total > 1 && (shard == 0 || shard > total) {
            return Err(ConfigError::ShardOutOfRange { shard, total });
        }
        if total <= 1 {
            self.shard = 0;
            self.total_shards = 0;
        } else {
            self.shard = shard;
            self.total_shards = total;
        }
        Ok(())
    }

    /// Listing entries. When sharded, only this shard's slice of the
    /// runnable entries.
    pub fn list(&self, config: &RunConfig) -> Vec<Info> {
        let infos = self.root.list(config);
        if self.total_shards == 0 {
            return infos;
        }
        let runnable: Vec<Info> = infos.into_iter().filter(|info| info.will_run).collect();
        let (start, count) = calculate_shard(runnable.len(), self.shard, self.total_shards);
        runnable.into_iter().skip(start).take(count).collect()
    }

    /// Run the project; see [`schedule::run_project`].
    pub fn run(&self, config: &RunConfig, results: &mut Vec<RunResult>) -> Result<()> {
        schedule::run_project(self, config, results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{group_with, run_config, test_in};

    fn labels(items: &[&str]) -> LabelSet {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn names_compose_from_the_root() {
        let root = group_with("root", "", 0);
        let apps = Group::child(
            &root,
            PathBuf::from("root/apps"),
            "apps",
            1,
            Tags::default(),
            None,
        );
        let test = test_in(&apps, "basic", "", 2);
        assert_eq!(apps.name, "root.apps");
        assert_eq!(test.name, "root.apps.basic");
        assert_eq!(test.parent, "root.apps");
    }

    #[test]
    fn tests_inherit_ancestor_labels_but_groups_check_their_own() {
        let root = group_with("root", "linux", 0);
        let mut tags = Tags::default();
        tags.labels = "!slow".to_string();
        let sub = Group::child(&root, PathBuf::from("sub"), "sub", 0, tags, None);
        let test = test_in(&sub, "t", "gpu", 0);

        assert_eq!(sub.labels, LabelSet::new());
        assert_eq!(sub.not_labels, labels(&["slow"]));
        assert_eq!(test.labels, labels(&["linux", "gpu"]));
        assert_eq!(test.not_labels, labels(&["slow"]));
    }

    #[test]
    fn test_will_run_applies_labels_and_pattern() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = group_with("root", "", 0);
        let test = test_in(&root, "t", "gpu", 0);

        assert!(test.will_run(&run_config(temp.path(), "gpu", "")));
        assert!(!test.will_run(&run_config(temp.path(), "tpu", "")));
        assert!(!test.will_run(&run_config(temp.path(), "gpu,!gpu", "")));
        assert!(test.will_run(&run_config(temp.path(), "gpu", "root.t")));
        assert!(!test.will_run(&run_config(temp.path(), "gpu", "root.u")));
    }

    #[test]
    fn group_pattern_matches_in_both_directions() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = group_with("root", "", 0);
        let apps = Group::child(&root, PathBuf::from("apps"), "apps", 0, Tags::default(), None);

        assert!(apps.will_run(&run_config(temp.path(), "", "root.apps.basic")));
        assert!(apps.will_run(&run_config(temp.path(), "", "root")));
        assert!(!apps.will_run(&run_config(temp.path(), "", "root.other")));
    }

    #[test]
    fn shard_restriction_limits_groups_and_tests() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = group_with("root", "", 0);
        let apps = Group::child(&root, PathBuf::from("apps"), "apps", 0, Tags::default(), None);
        let kept = test_in(&apps, "kept", "", 0);
        let dropped = test_in(&apps, "dropped", "", 1);

        let mut config = run_config(temp.path(), "", "");
        config.restrict_to_tests = Some(Arc::new(
            ["root.apps.kept".to_string()].into_iter().collect(),
        ));
        assert!(apps.will_run(&config));
        assert!(kept.will_run(&config));
        assert!(!dropped.will_run(&config));

        let other = Group::child(&root, PathBuf::from("other"), "other", 0, Tags::default(), None);
        assert!(!other.will_run(&config));
    }

    #[test]
    fn skipped_groups_list_as_a_single_entry() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut root = group_with("root", "", 0);
        let mut tags = Tags::default();
        tags.labels = "windows".to_string();
        tags.summary = "windows only".to_string();
        let mut win = Group::child(&root, PathBuf::from("win"), "win", 0, tags, None);
        let inner = test_in(&win, "t", "", 0);
        win.children.push(Node::Test(Arc::new(inner)));
        root.children.push(Node::Group(win));
        let visible = test_in(&root, "visible", "", 1);
        root.children.push(Node::Test(Arc::new(visible)));

        let infos = Project::new(root).list(&run_config(temp.path(), "linux", ""));
        let rows: Vec<(&str, bool)> = infos
            .iter()
            .map(|info| (info.name.as_str(), info.will_run))
            .collect();
        assert_eq!(rows, vec![("root.win", false), ("root.visible", true)]);
        assert_eq!(infos[0].summary, "windows only");
    }

    #[test]
    fn children_sort_stably_by_order() {
        let mut root = group_with("root", "", 0);
        for (name, order) in [("c", 2), ("a", 1), ("b", 1), ("z", 0)] {
            let test = test_in(&root, name, "", order);
            root.children.push(Node::Test(Arc::new(test)));
        }
        root.sort_children();
        let names: Vec<&str> = root.children.iter().map(Node::name).collect();
        assert_eq!(names, vec!["root.z", "root.a", "root.b", "root.c"]);
    }

    #[test]
    fn repeat_defaults_to_one() {
        let root = group_with("root", "", 0);
        let mut test = test_in(&root, "t", "", 0);
        assert_eq!(test.repeat(), 1);
        test.tags.repeat = Some(0);
        assert_eq!(test.repeat(), 1);
        test.tags.repeat = Some(3);
        assert_eq!(test.repeat(), 3);
    }

    #[test]
    fn set_shard_validates_bounds() {
        let mut project = Project::new(group_with("root", "", 0));
        project.set_shard(2, 3).expect("valid");
        assert_eq!((project.shard, project.total_shards), (2, 3));
        project.set_shard(1, 1).expect("unsharded");
        assert_eq!((project.shard, project.total_shards), (0, 0));
        assert!(project.set_shard(4, 3).is_err());
        assert!(project.set_shard(0, 3).is_err());
    }

    #[test]
    fn sharded_listing_slices_runnable_entries() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut root = group_with("root", "", 0);
        for (i, name) in ["a", "b", "c", "d", "e"].into_iter().enumerate() {
            let label = if name == "c" { "windows" } else { "" };
            let test = test_in(&root, name, label, i as i64);
            root.children.push(Node::Test(Arc::new(test)));
        }
        let mut project = Project::new(root);
        let config = run_config(temp.path(), "linux", "");

        let names = |project: &Project| -> Vec<String> {
            project
                .list(&config)
                .into_iter()
                .map(|info| info.name)
                .collect()
        };
        project.set_shard(1, 2).expect("shard");
        assert_eq!(names(&project), vec!["root.a", "root.b"]);
        project.set_shard(2, 2).expect("shard");
        assert_eq!(names(&project), vec!["root.d", "root.e"]);
    }

    #[test]
    fn group_commands_order_init_before_deinit() {
        let mut root = group_with("root", "", 0);
        root.group_file = Some(PathBuf::from("group.sh"));
        let init = root.command(CommandKind::Init).expect("init");
        let deinit = root.command(CommandKind::Deinit).expect("deinit");
        assert!(init.order() < deinit.order());
        assert_eq!(init.kind.arg(), "init");

        let bare = group_with("bare", "", 0);
        assert!(bare.command(CommandKind::Init).is_none());
    }
}
