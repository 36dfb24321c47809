use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// `    <name> (<start revision>)` as printed by `si projectinfo --devpaths`
static DEVPATH_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^    (.+) \(([0-9][.0-9]+)\)\s*$").expect("valid regex"));

/// Suffix appended to a branch name until it no longer collides
pub const BRANCH_SUFFIX: char = '_';

/// A development path and the checkpoint it branches from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Devpath {
    pub name: String,
    pub start_revision: String,
}

impl Devpath {
    pub fn new(name: impl Into<String>, start_revision: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start_revision: start_revision.into(),
        }
    }
}

/// A devpath the server no longer lists, with hand-supplied history text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingDevpath {
    pub devpath: Devpath,
    pub history: String,
}

/// Parse the devpath listing of the source project
pub fn parse_devpath_listing(text: &str) -> Vec<Devpath> {
    text.lines()
        .filter_map(|line| DEVPATH_LINE.captures(line))
        .map(|caps| Devpath::new(&caps[1], &caps[2]))
        .collect()
}

/// Merge listed and missing devpaths, drop ignored ones, and order them
pub fn build_registry(
    listed: Vec<Devpath>,
    missing: &[MissingDevpath],
    ignored: &[Devpath],
) -> Vec<Devpath> {
    let mut devpaths = listed;

    for entry in missing {
        if devpaths.iter().any(|d| d.name == entry.devpath.name) {
            warn!(devpath = %entry.devpath.name, "Missing devpath is listed by the server, using the server's entry");
            continue;
        }
        devpaths.push(entry.devpath.clone());
    }

    devpaths.retain(|d| {
        let skip = ignored.contains(d);
        if skip {
            debug!(devpath = %d.name, start = %d.start_revision, "Ignoring devpath");
        }
        !skip
    });

    order_devpaths(devpaths)
}

/// Sort devpaths by start revision, component-wise, then by name
pub fn order_devpaths(mut devpaths: Vec<Devpath>) -> Vec<Devpath> {
    let width = devpaths
        .iter()
        .flat_map(|d| d.start_revision.split('.'))
        .map(str::len)
        .max()
        .unwrap_or(0);
    let depth = devpaths
        .iter()
        .map(|d| d.start_revision.split('.').count())
        .max()
        .unwrap_or(0);

    devpaths.sort_by(|a, b| {
        let key_a = sort_key(&a.start_revision, width, depth);
        let key_b = sort_key(&b.start_revision, width, depth);
        match key_a.cmp(&key_b) {
            Ordering::Equal => a.name.cmp(&b.name),
            other => other,
        }
    });
    devpaths
}

/// Zero-pad every component to `width` and the component list to `depth`
pub fn sort_key(revision: &str, width: usize, depth: usize) -> String {
    let mut components: Vec<&str> = revision.split('.').collect();
    while components.len() < depth {
        components.push("0");
    }
    components
        .iter()
        .map(|c| format!("{:0>width$}", c, width = width))
        .collect::<String>()
}

/// Hands out branch names that are unique case-insensitively
#[derive(Debug, Default)]
pub struct BranchNames {
    taken: HashSet<String>,
}

impl BranchNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ref-safe name for a devpath, suffixed until it does not collide
    pub fn assign(&mut self, devpath_name: &str) -> String {
        let mut name = devpath_name.trim().replace(' ', "_");
        while self.taken.contains(&name.to_lowercase()) {
            name.push(BRANCH_SUFFIX);
        }
        self.taken.insert(name.to_lowercase());
        name
    }
}

/// Full ref of a devpath branch
pub fn branch_ref(branch_name: &str) -> String {
    format!("refs/heads/devpath/{}", branch_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(devpaths: &[Devpath]) -> Vec<&str> {
        devpaths.iter().map(|d| d.name.as_str()).collect()
    }

    #[test]
    fn test_parse_devpath_listing() {
        let text = "Development Paths:\n    Feature A (1.4)\n    hotfix (1.10)\nsomething else\n    bad (x.y)\n";
        let devpaths = parse_devpath_listing(text);
        assert_eq!(
            devpaths,
            vec![Devpath::new("Feature A", "1.4"), Devpath::new("hotfix", "1.10")]
        );
    }

    #[test]
    fn test_order_pads_components_before_comparing() {
        let devpaths = vec![
            Devpath::new("ten", "1.10"),
            Devpath::new("nested", "1.4.1.2"),
            Devpath::new("four", "1.4"),
        ];
        let ordered = order_devpaths(devpaths);
        assert_eq!(names(&ordered), vec!["four", "nested", "ten"]);
    }

    #[test]
    fn test_order_breaks_ties_by_name() {
        let devpaths = vec![Devpath::new("zeta", "1.4"), Devpath::new("alpha", "1.4")];
        assert_eq!(names(&order_devpaths(devpaths)), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_order_is_total_and_stable_under_permutation() {
        let base = vec![
            Devpath::new("a", "1.2"),
            Devpath::new("b", "1.10"),
            Devpath::new("c", "1.2.1.1"),
            Devpath::new("d", "1.2.1.10"),
            Devpath::new("e", "1.2.1.9"),
        ];
        let expected = names(&order_devpaths(base.clone()))
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        assert_eq!(expected, vec!["a", "c", "e", "d", "b"]);

        let mut reversed = base;
        reversed.reverse();
        let again: Vec<String> = order_devpaths(reversed).into_iter().map(|d| d.name).collect();
        assert_eq!(again, expected);
    }

    #[test]
    fn test_sort_key() {
        assert_eq!(sort_key("1.4", 2, 4), "01040000");
        assert_eq!(sort_key("1.4.1.2", 2, 4), "01040102");
        assert_eq!(sort_key("1.10", 2, 4), "01100000");
    }

    #[test]
    fn test_build_registry_splices_missing_and_drops_ignored() {
        let listed = vec![Devpath::new("b", "1.5"), Devpath::new("old", "1.2")];
        let missing = vec![MissingDevpath {
            devpath: Devpath::new("lost", "1.3"),
            history: String::new(),
        }];
        let ignored = vec![Devpath::new("old", "1.2")];

        let registry = build_registry(listed, &missing, &ignored);
        assert_eq!(names(&registry), vec!["lost", "b"]);
    }

    #[test]
    fn test_build_registry_ignore_requires_matching_start() {
        let listed = vec![Devpath::new("old", "1.2")];
        let ignored = vec![Devpath::new("old", "1.9")];
        assert_eq!(build_registry(listed, &[], &ignored).len(), 1);
    }

    #[test]
    fn test_build_registry_prefers_listed_over_missing() {
        let listed = vec![Devpath::new("dup", "1.5")];
        let missing = vec![MissingDevpath {
            devpath: Devpath::new("dup", "1.3"),
            history: String::new(),
        }];
        let registry = build_registry(listed, &missing, &[]);
        assert_eq!(registry, vec![Devpath::new("dup", "1.5")]);
    }

    #[test]
    fn test_branch_names_disambiguate_case_insensitively() {
        let mut branches = BranchNames::new();
        assert_eq!(branches.assign("Feature"), "Feature");
        assert_eq!(branches.assign("feature"), "feature_");
        assert_eq!(branches.assign("FEATURE"), "FEATURE__");
        assert_eq!(branches.assign("my path"), "my_path");
        assert_eq!(branches.assign("My_Path"), "My_Path_");
    }

    #[test]
    fn test_branch_ref() {
        assert_eq!(branch_ref("hotfix"), "refs/heads/devpath/hotfix");
    }
}
