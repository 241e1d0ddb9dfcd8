//! The authored pipeline: steps interleaved with loop markers.

use crate::error::StructuralError;
use crate::model::{PipelineItem, Step};

/// Stack-based nesting check. `allow_open` accepts loop starts that are still waiting for
/// their end marker (the editor inserts the two halves one at a time).
pub fn check_structure(program: &[PipelineItem], allow_open: bool) -> Result<(), StructuralError> {
    let mut depth = 0usize;
    for (index, item) in program.iter().enumerate() {
        match item {
            PipelineItem::LoopStart(_) => depth += 1,
            PipelineItem::LoopEnd(_) => {
                if depth == 0 {
                    return Err(StructuralError::UnmatchedLoopEnd { index });
                }
                depth -= 1;
            }
            PipelineItem::Step(_) => {}
        }
    }
    if depth > 0 && !allow_open {
        return Err(StructuralError::UnclosedLoop { count: depth });
    }
    Ok(())
}

pub fn validate(program: &[PipelineItem], allow_open: bool) -> bool {
    check_structure(program, allow_open).is_ok()
}

struct Frame {
    repeat: u32,
    items: Vec<Step>,
}

/// Expand loops into the concrete ordered list of steps.
///
/// A program with a loop that is never closed flattens to nothing. A stray loop end is
/// ignored; [`check_structure`] reports it.
pub fn flatten(program: &[PipelineItem]) -> Vec<Step> {
    let mut stack = vec![Frame {
        repeat: 1,
        items: Vec::new(),
    }];

    for item in program {
        match item {
            PipelineItem::LoopStart(start) => stack.push(Frame {
                repeat: start.repeat.max(1),
                items: Vec::new(),
            }),
            PipelineItem::LoopEnd(_) => {
                if stack.len() <= 1 {
                    continue;
                }
                let Some(frame) = stack.pop() else { continue };
                let Some(parent) = stack.last_mut() else { continue };
                for _ in 0..frame.repeat {
                    parent.items.extend(frame.items.iter().cloned());
                }
            }
            PipelineItem::Step(step) => {
                if let Some(top) = stack.last_mut() {
                    top.items.push(step.clone());
                }
            }
        }
    }

    if stack.len() != 1 {
        return Vec::new();
    }
    stack.pop().map(|f| f.items).unwrap_or_default()
}

/// Steps that will actually be dispatched.
pub fn active_steps(flat: &[Step]) -> impl Iterator<Item = &Step> {
    flat.iter().filter(|s| s.activated)
}

/// Whether moving the item at `from` to `to` keeps the program free of stray loop ends.
pub fn can_move(program: &[PipelineItem], from: usize, to: usize) -> bool {
    if from >= program.len() || to >= program.len() {
        return false;
    }
    let mut candidate: Vec<&PipelineItem> = program.iter().collect();
    let item = candidate.remove(from);
    candidate.insert(to, item);
    let owned: Vec<PipelineItem> = candidate.into_iter().cloned().collect();
    validate(&owned, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Extent3;

    fn step(name: &str) -> PipelineItem {
        PipelineItem::Step(Step::new(name, Some("s".into()), Extent3::new(1, 1, 1)))
    }

    fn names(steps: &[Step]) -> Vec<&str> {
        steps.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn lone_loop_end_is_invalid_even_when_open_is_allowed() {
        let program = vec![PipelineItem::loop_end()];
        assert_eq!(
            check_structure(&program, true),
            Err(StructuralError::UnmatchedLoopEnd { index: 0 })
        );
    }

    #[test]
    fn open_loop_depends_on_allow_open() {
        let program = vec![PipelineItem::loop_start(2), step("a")];
        assert!(!validate(&program, false));
        assert!(validate(&program, true));
        assert!(flatten(&program).is_empty());
    }

    #[test]
    fn nested_loops_multiply() {
        let program = vec![
            step("pre"),
            PipelineItem::loop_start(2),
            step("a"),
            PipelineItem::loop_start(3),
            step("b"),
            PipelineItem::loop_end(),
            PipelineItem::loop_end(),
            step("post"),
        ];
        let flat = flatten(&program);
        assert_eq!(
            names(&flat),
            vec!["pre", "a", "b", "b", "b", "a", "b", "b", "b", "post"]
        );
    }

    #[test]
    fn zero_repeat_counts_as_one() {
        let mut start = PipelineItem::loop_start(1);
        if let PipelineItem::LoopStart(l) = &mut start {
            l.repeat = 0;
        }
        let program = vec![start, step("a"), PipelineItem::loop_end()];
        assert_eq!(flatten(&program).len(), 1);
    }

    #[test]
    fn inactive_steps_survive_flattening() {
        let mut off = Step::new("off", None, Extent3::default());
        off.activated = false;
        let program = vec![step("on"), PipelineItem::Step(off)];
        let flat = flatten(&program);
        assert_eq!(flat.len(), 2);
        assert_eq!(active_steps(&flat).count(), 1);
    }

    #[test]
    fn moving_end_before_start_is_rejected() {
        let program = vec![PipelineItem::loop_start(2), step("a"), PipelineItem::loop_end()];
        assert!(!can_move(&program, 2, 0));
        assert!(can_move(&program, 1, 0));
    }
}
