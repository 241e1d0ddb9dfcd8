use compute_forge::model::{Extent3, PipelineItem, Step};
use compute_forge::program::{flatten, validate};
use proptest::prelude::*;

fn step(i: usize) -> Step {
    Step::new(format!("step{i}"), Some(format!("shader{}", i % 3)), Extent3::new(1, 1, 1))
}

fn as_items(steps: &[Step]) -> Vec<PipelineItem> {
    steps.iter().cloned().map(PipelineItem::Step).collect()
}

fn ids(steps: &[Step]) -> Vec<String> {
    steps.iter().map(|s| s.id.clone()).collect()
}

proptest! {
    #[test]
    fn flatten_is_idempotent_on_flat_programs(n in 0usize..24) {
        let program = as_items(&(0..n).map(step).collect::<Vec<_>>());
        let once = flatten(&program);
        let twice = flatten(&as_items(&once));
        prop_assert_eq!(ids(&once), ids(&twice));
    }

    #[test]
    fn loop_expands_to_repeat_times_body(repeat in 1u32..7, k in 0usize..6, before in 0usize..3, after in 0usize..3) {
        let head: Vec<Step> = (0..before).map(step).collect();
        let body: Vec<Step> = (100..100 + k).map(step).collect();
        let tail: Vec<Step> = (200..200 + after).map(step).collect();

        let mut program = as_items(&head);
        program.push(PipelineItem::loop_start(repeat));
        program.extend(as_items(&body));
        program.push(PipelineItem::loop_end());
        program.extend(as_items(&tail));
        prop_assert!(validate(&program, false));

        let flat = flatten(&program);
        prop_assert_eq!(flat.len(), before + repeat as usize * k + after);

        let looped = &flat[before..before + repeat as usize * k];
        for chunk in looped.chunks(k.max(1)) {
            prop_assert_eq!(ids(chunk), ids(&body));
        }
        prop_assert_eq!(ids(&flat[..before]), ids(&head));
        prop_assert_eq!(ids(&flat[flat.len() - after..]), ids(&tail));
    }
}

#[test]
fn lone_loop_end_and_dangling_start() {
    let lone_end = vec![PipelineItem::loop_end()];
    assert!(!validate(&lone_end, false));
    assert!(!validate(&lone_end, true));

    let dangling = vec![PipelineItem::Step(step(0)), PipelineItem::loop_start(3)];
    assert!(!validate(&dangling, false));
    assert!(validate(&dangling, true));
}
