//! Check command implementation.

use notegraph_core::{CheckReport, CheckerConfig, MissingNotePolicy, NoteGraph};
use std::path::Path;

/// Runs the check command. Returns whether the graph was clean.
pub fn run(path: &Path, dry_run: bool, placeholders: bool) -> Result<bool, Box<dyn std::error::Error>> {
    println!("Checking graph at {:?}", path);
    println!();

    let graph = super::open_existing(path)?;
    let report = check(&graph, dry_run, placeholders);
    print_report(&report, dry_run);
    Ok(report.is_clean())
}

fn check(graph: &NoteGraph, dry_run: bool, placeholders: bool) -> CheckReport {
    let policy = if placeholders {
        MissingNotePolicy::CreatePlaceholder
    } else {
        MissingNotePolicy::RemoveBranch
    };
    let checker = graph.checker(
        CheckerConfig::new()
            .missing_note_policy(policy)
            .auto_repair(!dry_run),
    );
    if dry_run {
        checker.check_only()
    } else {
        checker.run()
    }
}

fn print_report(report: &CheckReport, dry_run: bool) {
    if report.findings.is_empty() {
        println!("No problems found ({} ms)", report.duration.as_millis());
        return;
    }
    for finding in &report.findings {
        let status = if finding.repaired { "repaired" } else { "found" };
        println!(
            "  [{status}] {} {} {}: {}",
            finding.kind, finding.entity_kind, finding.entity_id, finding.detail
        );
    }
    println!();
    if dry_run {
        println!("{} problem(s) found, nothing repaired", report.findings.len());
    } else {
        println!(
            "{} problem(s) found, {} repaired",
            report.findings.len(),
            report.repaired()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notegraph_core::{Branch, EntityId, EntityRecord, IssueKind};

    fn graph_with_dangling_branch(dir: &Path) -> NoteGraph {
        {
            let graph = NoteGraph::open(dir).unwrap();
            let mut branch = EntityRecord::from(Branch::new(
                EntityId::root(),
                EntityId::from("ghost"),
                0,
            ));
            branch.seal();
            graph.store().write_entity(branch).unwrap();
        }
        NoteGraph::open(dir).unwrap()
    }

    #[test]
    fn dry_run_reports_without_repairing() {
        let dir = tempfile::tempdir().unwrap();
        let graph = graph_with_dangling_branch(dir.path());

        let report = check(&graph, true, false);
        assert!(!report.is_clean());
        assert_eq!(report.of_kind(IssueKind::BranchMissingNote).count(), 1);
        assert_eq!(report.repaired(), 0);

        let repaired = check(&graph, false, false);
        assert_eq!(repaired.repaired(), 1);
        assert!(check(&graph, true, false).is_clean());
    }

    #[test]
    fn placeholder_policy_creates_the_note() {
        let dir = tempfile::tempdir().unwrap();
        let graph = graph_with_dangling_branch(dir.path());

        check(&graph, false, true);
        assert!(graph.becca().get_note(&EntityId::from("ghost")).is_some());
    }
}
