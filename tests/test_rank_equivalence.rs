use ndarray::{s, Array2, Array3, Array4, ArrayD};
use snowblind::core::{DefectEngine, RegionDilator, SnowblindParams};

const JUMP: u32 = 4;

fn jump_frame() -> Array2<u32> {
    let mut frame = Array2::zeros((40, 40));
    frame.slice_mut(s![12..26, 15..27]).fill(JUMP);
    frame.slice_mut(s![30..33, 5..8]).fill(JUMP);
    frame[[2, 30]] = JUMP;
    frame
}

/// The same frame as a rate image, one frame of a stack and the last group
/// of a ramp
fn embeddings(frame: &Array2<u32>) -> (ArrayD<u32>, ArrayD<u32>, ArrayD<u32>) {
    let rank2 = frame.clone().into_dyn();

    let mut rank3 = Array3::zeros((3, 40, 40));
    rank3.slice_mut(s![1, .., ..]).assign(frame);

    let mut rank4 = Array4::zeros((2, 3, 40, 40));
    rank4.slice_mut(s![1, 2, .., ..]).assign(frame);

    (rank2, rank3.into_dyn(), rank4.into_dyn())
}

#[test]
fn test_dilation_identical_across_ranks() {
    let frame = jump_frame();
    let (rank2, rank3, rank4) = embeddings(&frame);
    let dilator = RegionDilator::default();
    let as_bool = |dq: &ArrayD<u32>| dq.mapv(|w| w & JUMP == JUMP);

    let out2 = dilator.dilate_mask(as_bool(&rank2).view()).unwrap().mask;
    let out3 = dilator.dilate_mask(as_bool(&rank3).view()).unwrap().mask;
    let out4 = dilator.dilate_mask(as_bool(&rank4).view()).unwrap().mask;

    let reference = out2.into_dimensionality::<ndarray::Ix2>().unwrap();
    assert!(reference.iter().any(|&v| v));
    assert_eq!(out3.slice(s![1, .., ..]), reference);
    assert_eq!(out4.slice(s![1, 2, .., ..]), reference);

    assert_eq!(out3.iter().filter(|&&v| v).count(), reference.iter().filter(|&&v| v).count());
    assert_eq!(out4.iter().filter(|&&v| v).count(), reference.iter().filter(|&&v| v).count());
}

#[test]
fn test_snowblind_identical_across_ranks() {
    let frame = jump_frame();
    let (mut rank2, mut rank3, mut rank4) = embeddings(&frame);
    let engine = DefectEngine::default();
    let params = SnowblindParams::default();

    let r2 = engine.snowblind(&mut rank2, &params).unwrap();
    let r3 = engine.snowblind(&mut rank3, &params).unwrap();
    let r4 = engine.snowblind(&mut rank4, &params).unwrap();

    let reference = rank2.into_dimensionality::<ndarray::Ix2>().unwrap();
    assert_eq!(rank3.slice(s![1, .., ..]), reference);
    assert_eq!(rank4.slice(s![1, 2, .., ..]), reference);
    assert_eq!(r2.flagged_pixels, r3.flagged_pixels);
    assert_eq!(r2.flagged_pixels, r4.flagged_pixels);
}
