// Commit evaluation pipeline
//
// input      - repository and commit-pair lists
// coordinator- classification, dedup, resume, dispatch to workers
// worker     - one pair end to end inside its own sandbox
// record     - result records and the per-repository store
// artifact   - image names, reproduction scripts, skip policy
// output     - the accepted-pairs ledger

pub mod artifact;
pub mod coordinator;
pub mod input;
pub mod output;
pub mod record;
pub mod worker;

pub use artifact::{image_name, image_tag, load_hub_tags, ImagePolicy};
pub use coordinator::{Collaborators, Coordinator, RunSummary};
pub use input::{parse_commit_list, parse_repo_list, read_commit_list, read_repo_list};
pub use output::{format_pair, merge_pairs, PairLedger};
pub use record::{ResultRecord, ResultStore};
pub use worker::{Candidate, PairOutcome, Worker, WorkerEnv};

#[cfg(test)]
mod tests;
