//! The distillation pipeline proper:
//! `IDLE -> LOAD -> CLUSTER -> [BRANCH?] -> EXTRACT -> SAMPLE(DP?) -> WRITE
//! -> ARCHIVE -> COMMIT -> DONE`, grounded on `distiller.py::run`.
//!
//! Failure policy (spec.md §4.8): an IO error while extracting from or
//! writing a single cluster is logged and that cluster is skipped, the
//! run continues with the rest. A privacy-budget denial aborts the whole
//! run before any file is written.

use std::collections::BTreeMap;

use memvcs_integrity::{noisy_count, sample_without_replacement, PrivacyBudget, PrivacyError};
use memvcs_objects::Author;
use memvcs_repo::{RepoError, Repository};
use memvcs_storage::StorageError;
use thiserror::Error;
use tracing::{info, warn};

use crate::cluster::{cluster_episodes, EpisodeCluster};
use crate::extract::extract_facts;
use crate::llm::LlmProvider;

#[derive(Error, Debug)]
pub enum DistillError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Privacy(#[from] PrivacyError),
    #[error("privacy budget exceeded; distillation run aborted before any write")]
    PrivacyBudgetExceeded,
}

#[derive(Debug, Clone)]
pub struct DistillConfig {
    pub source_dir: String,
    pub target_dir: String,
    pub archive_dir: String,
    pub min_cluster_size: usize,
    pub max_clusters: usize,
    pub chunk_chars: usize,
    pub max_facts_per_cluster: usize,
    pub extraction_confidence_threshold: f64,
    pub create_safety_branch: bool,
    pub safety_branch_prefix: String,
    pub use_dp: bool,
    pub dp_epsilon: f64,
    pub dp_delta: f64,
    pub dp_epsilon_max: f64,
}

impl Default for DistillConfig {
    fn default() -> Self {
        Self {
            source_dir: "episodic".to_string(),
            target_dir: "semantic/consolidated".to_string(),
            archive_dir: "archive".to_string(),
            min_cluster_size: 3,
            max_clusters: 10,
            chunk_chars: 512,
            max_facts_per_cluster: 15,
            extraction_confidence_threshold: 0.7,
            create_safety_branch: true,
            safety_branch_prefix: "auto-distill/".to_string(),
            use_dp: false,
            dp_epsilon: 1.0,
            dp_delta: 1e-5,
            dp_epsilon_max: 10.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistillResult {
    pub clusters_processed: usize,
    pub facts_extracted: usize,
    pub episodes_archived: usize,
    pub branch_created: Option<String>,
    pub commit_hash: Option<String>,
    pub message: String,
}

fn sanitize_topic(topic: &str) -> String {
    let lowered = topic.to_lowercase().replace(' ', "-").replace('/', "_");
    lowered.chars().take(30).collect()
}

fn is_markdown(path: &str) -> bool {
    path.ends_with(".md")
}

fn frontmatter(tags: &[String], confidence: f64) -> String {
    let now = chrono::Utc::now().to_rfc3339();
    let tag_list = tags
        .iter()
        .map(|t| format!("  - {t}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "---\nschema_version: \"1.0\"\nlast_updated: {now}\nsource_agent_id: distiller\nmemory_type: semantic\ntags:\n{tag_list}\nconfidence_score: {confidence}\n---\n\n"
    )
}

struct ClusterOutput {
    topic: String,
    facts: Vec<String>,
    episodes: Vec<String>,
}

/// Run one distillation pass over `repo.work_storage()`'s episodic
/// directory. `llm` is an optional upgrade over the heuristic extractor;
/// `author` is attributed on the resulting commit.
pub fn run(
    repo: &Repository,
    config: &DistillConfig,
    llm: Option<&dyn LlmProvider>,
    author: Author,
) -> Result<DistillResult, DistillError> {
    let work = repo.work_storage().as_ref();
    let meta = repo.meta_storage().as_ref();

    // LOAD
    let episodes = load_episodes(work, &config.source_dir)?;
    if episodes.is_empty() {
        return Ok(DistillResult {
            message: "No episodes to process".to_string(),
            ..Default::default()
        });
    }

    // CLUSTER
    let clusters = cluster_episodes(&episodes, config.min_cluster_size, config.max_clusters);
    if clusters.is_empty() {
        return Ok(DistillResult {
            message: "No clusters formed".to_string(),
            ..Default::default()
        });
    }
    let episode_contents: BTreeMap<&str, &str> = episodes
        .iter()
        .map(|(p, c)| (p.as_str(), c.as_str()))
        .collect();

    // SAMPLE(DP?) budget check — must happen before any write, the whole
    // run aborts on denial rather than degrading silently.
    if config.use_dp {
        let mut budget = PrivacyBudget::load(meta, config.dp_epsilon_max, config.dp_delta)?;
        if !budget.spend(meta, config.dp_epsilon)? {
            return Err(DistillError::PrivacyBudgetExceeded);
        }
    }

    // BRANCH
    let branch_created = if config.create_safety_branch {
        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let branch_name = format!("{}{today}", config.safety_branch_prefix);
        if !repo.branch_exists(&branch_name)? {
            repo.create_branch(&branch_name, "HEAD")?;
            repo.checkout(&branch_name, true)?;
        }
        Some(branch_name)
    } else {
        None
    };

    // EXTRACT (+ in-place DP sampling once facts are known)
    let mut outputs = Vec::new();
    let mut facts_count = 0usize;
    for cluster in &clusters {
        match extract_cluster(cluster, &episode_contents, config, llm) {
            Ok(mut facts) => {
                if config.use_dp {
                    let target = noisy_count(facts.len(), config.dp_epsilon, config.dp_delta)
                        .unwrap_or(facts.len())
                        .max(1)
                        .min(facts.len());
                    facts = sample_without_replacement(&facts, target);
                }
                facts_count += facts.len();
                outputs.push(ClusterOutput {
                    topic: cluster.topic.clone(),
                    facts,
                    episodes: cluster.episodes.clone(),
                });
            }
            Err(e) => {
                warn!(topic = %cluster.topic, error = %e, "skipping cluster after extraction failure");
            }
        }
    }

    // WRITE
    let mut written_paths = Vec::new();
    let date = chrono::Utc::now().format("%Y%m%d").to_string();
    for output in &outputs {
        match write_consolidated(work, &config.target_dir, output, &date, config.extraction_confidence_threshold) {
            Ok(path) => written_paths.push(path),
            Err(e) => warn!(topic = %output.topic, error = %e, "skipping cluster after write failure"),
        }
    }

    // ARCHIVE
    let all_episode_paths: Vec<String> = outputs.iter().flat_map(|o| o.episodes.clone()).collect();
    let episodes_archived = archive_episodes(work, meta, &config.archive_dir, &all_episode_paths)?;

    // COMMIT
    let mut commit_hash = None;
    if !written_paths.is_empty() {
        for path in &written_paths {
            repo.add(path)?;
        }
        let message = format!(
            "distiller: consolidated {facts_count} facts from {} episodes",
            episodes.len()
        );
        let mut metadata = BTreeMap::new();
        metadata.insert("distiller".to_string(), serde_json::Value::Bool(true));
        metadata.insert("clusters".to_string(), serde_json::Value::from(outputs.len()));
        commit_hash = repo.commit(&message, author, metadata)?;
    }

    info!(
        clusters = outputs.len(),
        facts = facts_count,
        archived = episodes_archived,
        "distillation run complete"
    );
    Ok(DistillResult {
        clusters_processed: outputs.len(),
        facts_extracted: facts_count,
        episodes_archived,
        branch_created,
        commit_hash,
        message: format!(
            "Processed {} clusters, extracted {facts_count} facts",
            outputs.len()
        ),
    })
}

fn list_files_recursive(
    storage: &dyn memvcs_storage::StorageAdapter,
    root: &str,
) -> Result<Vec<String>, StorageError> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_string()];
    while let Some(dir) = stack.pop() {
        for entry in storage.list(&dir)? {
            if entry.is_dir {
                stack.push(entry.path);
            } else {
                out.push(entry.path);
            }
        }
    }
    out.sort();
    Ok(out)
}

fn load_episodes(
    work: &dyn memvcs_storage::StorageAdapter,
    source_dir: &str,
) -> Result<Vec<(String, String)>, DistillError> {
    if !work.exists(source_dir)? {
        return Ok(Vec::new());
    }
    let mut episodes = Vec::new();
    for path in list_files_recursive(work, source_dir)? {
        if !is_markdown(&path) {
            continue;
        }
        match work.read(&path) {
            Ok(bytes) => episodes.push((path, String::from_utf8_lossy(&bytes).to_string())),
            Err(e) => warn!(path = %path, error = %e, "skipping unreadable episode"),
        }
    }
    Ok(episodes)
}

fn extract_cluster(
    cluster: &EpisodeCluster,
    episode_contents: &BTreeMap<&str, &str>,
    config: &DistillConfig,
    llm: Option<&dyn LlmProvider>,
) -> Result<Vec<String>, DistillError> {
    let combined = cluster
        .episodes
        .iter()
        .take(10)
        .filter_map(|path| episode_contents.get(path.as_str()))
        .map(|content| content.chars().take(1000).collect::<String>())
        .collect::<Vec<_>>()
        .join("\n---\n");
    Ok(extract_facts(
        &cluster.topic,
        &combined,
        config.chunk_chars,
        llm,
        config.max_facts_per_cluster,
    ))
}

fn write_consolidated(
    work: &dyn memvcs_storage::StorageAdapter,
    target_dir: &str,
    output: &ClusterOutput,
    date: &str,
    confidence: f64,
) -> Result<String, DistillError> {
    let filename = format!("consolidated-{}-{date}.md", sanitize_topic(&output.topic));
    let path = format!("{}/{}", target_dir.trim_end_matches('/'), filename);
    let mut tags: Vec<String> = vec![output.topic.clone(), "auto-generated".to_string(), "consolidated".to_string()];
    tags.dedup();
    let body = format!("# Consolidated: {}\n\n{}", output.topic, output.facts.join("\n"));
    let content = format!("{}{body}\n", frontmatter(&tags, confidence));
    work.write(&path, content.as_bytes())?;
    Ok(path)
}

/// Move processed episode files into a single timestamped archive
/// subfolder under the repository's internal storage, one commit's worth
/// of inputs at a time.
fn archive_episodes(
    work: &dyn memvcs_storage::StorageAdapter,
    meta: &dyn memvcs_storage::StorageAdapter,
    archive_dir: &str,
    episode_paths: &[String],
) -> Result<usize, DistillError> {
    if episode_paths.is_empty() {
        return Ok(0);
    }
    let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S").to_string();
    let mut count = 0;
    for path in episode_paths {
        let safe_name = path.replace("..", "_").replace('/', "_");
        let dest = format!("{}/{stamp}/{safe_name}", archive_dir.trim_end_matches('/'));
        match work.read(path) {
            Ok(bytes) => {
                if meta.write(&dest, &bytes).is_ok() {
                    let _ = work.delete(path);
                    count += 1;
                }
            }
            Err(e) => warn!(path = %path, error = %e, "could not archive episode"),
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use memvcs_storage::LocalStorageAdapter;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn author() -> Author {
        Author {
            name: "agent".to_string(),
            email: "agent@example.com".to_string(),
        }
    }

    fn seeded_repo() -> (tempfile::TempDir, tempfile::TempDir, Repository) {
        let meta_dir = tempdir().unwrap();
        let work_dir = tempdir().unwrap();
        let meta: Arc<dyn memvcs_storage::StorageAdapter> =
            Arc::new(LocalStorageAdapter::new(meta_dir.path()).unwrap());
        let work: Arc<dyn memvcs_storage::StorageAdapter> =
            Arc::new(LocalStorageAdapter::new(work_dir.path()).unwrap());
        let repo = Repository::init(meta, work, "main").unwrap();
        std::fs::write(work_dir.path().join("README.md"), "seed").unwrap();
        repo.add("README.md").unwrap();
        repo.commit("seed", author(), BTreeMap::new()).unwrap();
        (meta_dir, work_dir, repo)
    }

    fn write_episode(work_dir: &std::path::Path, name: &str, body: &str) {
        let path = work_dir.join("episodic").join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    /// Scenario S5: 9 episodes forming 2 keyword clusters (python x5,
    /// testing x4) with `C_min=3` and DP off.
    #[test]
    fn scenario_s5_two_clusters_no_dp() {
        let (_m, work_dir, repo) = seeded_repo();
        for i in 0..5 {
            write_episode(
                work_dir.path(),
                &format!("python-{i}.md"),
                "- The user prefers python for scripting tasks.\nWorking through a python error today.",
            );
        }
        for i in 0..4 {
            write_episode(
                work_dir.path(),
                &format!("testing-{i}.md"),
                "- The user likes thorough testing before every deploy.\nAdded more testing coverage.",
            );
        }

        let config = DistillConfig::default();
        let result = run(&repo, &config, None, author()).unwrap();

        assert_eq!(result.clusters_processed, 2);
        assert!(result.facts_extracted >= 2);
        assert_eq!(result.episodes_archived, 9);
        assert!(result.commit_hash.is_some());
        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        assert_eq!(result.branch_created, Some(format!("auto-distill/{today}")));
        assert_eq!(repo.current_branch().unwrap(), Some(format!("auto-distill/{today}")));

        let log = repo.log(Some(1), None).unwrap();
        assert!(log[0].commit.message.starts_with("distiller: consolidated"));

        let consolidated = list_files_recursive(repo.work_storage().as_ref(), "semantic/consolidated").unwrap();
        assert_eq!(consolidated.len(), 2);
    }

    #[test]
    fn no_episodes_is_a_clean_no_op() {
        let (_m, _w, repo) = seeded_repo();
        let result = run(&repo, &DistillConfig::default(), None, author()).unwrap();
        assert_eq!(result.clusters_processed, 0);
        assert_eq!(result.message, "No episodes to process");
        assert!(result.commit_hash.is_none());
    }

    #[test]
    fn below_threshold_cluster_forms_no_output() {
        let (_m, work_dir, repo) = seeded_repo();
        write_episode(work_dir.path(), "a.md", "mentions rust once");
        write_episode(work_dir.path(), "b.md", "mentions rust twice");

        let result = run(&repo, &DistillConfig::default(), None, author()).unwrap();
        assert_eq!(result.message, "No clusters formed");
        assert_eq!(result.clusters_processed, 0);
    }

    #[test]
    fn dp_denial_aborts_before_any_write() {
        let (_m, work_dir, repo) = seeded_repo();
        for i in 0..3 {
            write_episode(work_dir.path(), &format!("python-{i}.md"), "talking about python all day long");
        }
        let mut config = DistillConfig {
            use_dp: true,
            dp_epsilon: 5.0,
            dp_epsilon_max: 1.0,
            ..Default::default()
        };
        config.create_safety_branch = false;
        let err = run(&repo, &config, None, author()).unwrap_err();
        assert!(matches!(err, DistillError::PrivacyBudgetExceeded));

        let consolidated_exists = repo
            .work_storage()
            .exists("semantic/consolidated")
            .unwrap();
        assert!(!consolidated_exists);
    }
}
