use ndarray::{ArrayD, IxDyn};
use snowblind::core::DefectEngine;
use snowblind::types::StepStatus;

const JUMP: u32 = 4;

#[test]
fn test_jump_carried_one_group_forward() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut dq = ArrayD::<u32>::zeros(IxDyn(&[2, 4, 6, 6]));
    dq[[0, 1, 2, 2]] = JUMP;
    dq[[0, 3, 4, 4]] = JUMP;

    let status = DefectEngine::default()
        .jump_plus(&mut dq, 4)
        .expect("jump_plus failed");

    assert_eq!(status, StepStatus::Complete);
    assert_eq!(dq[[0, 2, 2, 2]], JUMP);
    assert_eq!(dq[[0, 3, 2, 2]], 0);
    assert_eq!(dq[[0, 0, 2, 2]], 0);
    // Last group of one integration never reaches the next
    assert_eq!(dq[[1, 0, 4, 4]], 0);
    assert!(dq.slice(ndarray::s![1, .., .., ..]).iter().all(|&w| w == 0));
}

#[test]
fn test_jump_plus_keeps_existing_bits() {
    let mut dq = ArrayD::<u32>::zeros(IxDyn(&[1, 3, 4, 4]));
    dq[[0, 0, 1, 1]] = JUMP;
    dq[[0, 1, 1, 1]] = 1;

    DefectEngine::default()
        .jump_plus(&mut dq, 2)
        .expect("jump_plus failed");

    assert_eq!(dq[[0, 1, 1, 1]], 1 | JUMP);
    assert_eq!(dq[[0, 2, 1, 1]], 0);
}
