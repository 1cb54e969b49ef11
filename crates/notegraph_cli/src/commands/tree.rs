//! Tree command implementation.

use notegraph_core::{Becca, EntityId};
use std::path::Path;

/// Runs the tree command.
pub fn run(path: &Path, root: &str, depth: Option<usize>) -> Result<(), Box<dyn std::error::Error>> {
    let graph = super::open_existing(path)?;
    let root = EntityId::from(root);
    let mut lines = Vec::new();
    render(graph.becca(), &root, depth.unwrap_or(usize::MAX), &mut lines)
        .ok_or_else(|| format!("Note {root} not found"))?;
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

/// Renders the subtree under `root`, one line per placement.
///
/// A note with several parents shows up under each of them. Returns `None`
/// if `root` is not a live note.
fn render(becca: &Becca, root: &EntityId, max_depth: usize, lines: &mut Vec<String>) -> Option<()> {
    let note = becca.get_note(root).filter(|n| !n.is_deleted)?;
    lines.push(format!("{} [{}]", note.title, note.id));
    walk(becca, root, 1, max_depth, lines);
    Some(())
}

fn walk(becca: &Becca, parent: &EntityId, depth: usize, max_depth: usize, lines: &mut Vec<String>) {
    if depth > max_depth {
        return;
    }
    for branch in becca.get_child_branches(parent) {
        let Some(child) = becca.get_note(&branch.note_id).filter(|n| !n.is_deleted) else {
            continue;
        };
        let prefix = branch
            .prefix
            .as_deref()
            .map(|p| format!("{p} - "))
            .unwrap_or_default();
        lines.push(format!(
            "{}{}{} [{}]",
            "  ".repeat(depth),
            prefix,
            child.title,
            child.id
        ));
        walk(becca, &child.id, depth + 1, max_depth, lines);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notegraph_core::{NewNote, NoteGraph};

    #[test]
    fn clones_appear_under_each_parent() {
        let graph = NoteGraph::open_in_memory().unwrap();
        let tracker = graph.tracker();
        let (work, _) = tracker
            .create_note(&EntityId::root(), NewNote::text("Work"))
            .unwrap();
        let (home, _) = tracker
            .create_note(&EntityId::root(), NewNote::text("Home"))
            .unwrap();
        let (task, _) = tracker.create_note(&work.id, NewNote::text("Task")).unwrap();
        tracker.clone_note(&task.id, &home.id, None).unwrap();

        let mut lines = Vec::new();
        render(graph.becca(), &EntityId::root(), usize::MAX, &mut lines).unwrap();
        assert_eq!(lines.iter().filter(|l| l.contains("Task")).count(), 2);
        assert!(lines[0].contains("[root]"));

        let mut shallow = Vec::new();
        render(graph.becca(), &EntityId::root(), 1, &mut shallow).unwrap();
        assert_eq!(shallow.len(), 3);
    }

    #[test]
    fn unknown_root_is_reported() {
        let graph = NoteGraph::open_in_memory().unwrap();
        let mut lines = Vec::new();
        assert!(render(graph.becca(), &EntityId::from("nope"), 3, &mut lines).is_none());
    }
}
