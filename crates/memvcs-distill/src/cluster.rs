//! Keyword-bucket clustering of episodic files, grounded on
//! `gardener.py`'s `cluster_episodes`: each file is scanned for a curated
//! keyword set, keywords are ranked by how many (still-unused) episodes
//! they touch, and the largest buckets claim episodes first so no episode
//! lands in more than one cluster.

use std::collections::{HashMap, HashSet};

/// Same vocabulary as the Python original's `cluster_episodes` — topical
/// and tooling terms common in an agent's working notes.
const KEYWORDS: &[&str] = &[
    "python", "javascript", "typescript", "rust", "go", "error", "bug", "fix", "debug", "issue",
    "api", "database", "server", "client", "frontend", "backend", "test", "testing", "deploy",
    "deployment", "config", "setup", "install", "environment", "performance", "optimization",
    "memory", "cache", "security", "auth", "authentication", "permission", "user", "preference",
    "setting", "option",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeCluster {
    pub topic: String,
    pub episodes: Vec<String>,
    pub tags: Vec<String>,
}

/// `C_min`/`C_max` from spec.md's §4.8: a keyword must cover at least
/// `min_cluster_size` still-unclaimed episodes to form a cluster, and at
/// most `max_clusters` clusters are emitted in total.
pub fn cluster_episodes(
    episodes: &[(String, String)],
    min_cluster_size: usize,
    max_clusters: usize,
) -> Vec<EpisodeCluster> {
    let mut keyword_to_paths: HashMap<&str, Vec<String>> = HashMap::new();
    for (path, content) in episodes {
        let lower = content.to_lowercase();
        for keyword in KEYWORDS {
            if lower.contains(keyword) {
                keyword_to_paths.entry(keyword).or_default().push(path.clone());
            }
        }
    }

    let mut ranked: Vec<(&str, Vec<String>)> = keyword_to_paths.into_iter().collect();
    ranked.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(b.0)));

    let mut used: HashSet<String> = HashSet::new();
    let mut clusters = Vec::new();
    for (keyword, paths) in ranked {
        if clusters.len() >= max_clusters {
            break;
        }
        let unused: Vec<String> = paths.into_iter().filter(|p| !used.contains(p)).collect();
        if unused.len() >= min_cluster_size {
            used.extend(unused.iter().cloned());
            clusters.push(EpisodeCluster {
                topic: keyword.to_string(),
                episodes: unused,
                tags: vec![keyword.to_string()],
            });
        }
    }
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(path: &str, content: &str) -> (String, String) {
        (path.to_string(), content.to_string())
    }

    #[test]
    fn forms_clusters_meeting_minimum_size() {
        let episodes = vec![
            ep("e1.md", "working on a python script"),
            ep("e2.md", "python error traceback"),
            ep("e3.md", "fixed the python import bug"),
            ep("e4.md", "wrote a testing harness"),
            ep("e5.md", "testing coverage improved"),
        ];
        let clusters = cluster_episodes(&episodes, 3, 10);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].topic, "python");
        assert_eq!(clusters[0].episodes.len(), 3);
    }

    #[test]
    fn an_episode_is_claimed_by_at_most_one_cluster() {
        let episodes = vec![
            ep("e1.md", "python bug and python error and python fix"),
            ep("e2.md", "python bug"),
            ep("e3.md", "python error"),
        ];
        let clusters = cluster_episodes(&episodes, 3, 10);
        let mut seen = HashSet::new();
        for cluster in &clusters {
            for path in &cluster.episodes {
                assert!(seen.insert(path.clone()), "episode claimed twice: {path}");
            }
        }
    }

    #[test]
    fn below_minimum_size_forms_no_cluster() {
        let episodes = vec![ep("e1.md", "rust code"), ep("e2.md", "rust again")];
        let clusters = cluster_episodes(&episodes, 3, 10);
        assert!(clusters.is_empty());
    }

    #[test]
    fn respects_max_clusters_cap() {
        let mut episodes = Vec::new();
        for kw in ["python", "rust", "go", "bug", "testing"] {
            for i in 0..4 {
                episodes.push(ep(&format!("{kw}-{i}.md"), &format!("about {kw} today")));
            }
        }
        let clusters = cluster_episodes(&episodes, 3, 2);
        assert_eq!(clusters.len(), 2);
    }
}
