use ndarray::{Array2, ArrayD, Dimension, IxDyn};
use snowblind::core::{FrameLayout, ShapeAdapter};
use snowblind::types::DefectError;

fn round_trip(shape: &[usize]) {
    let adapter = ShapeAdapter::from_shape(shape).expect("supported rank");
    let data = ArrayD::from_shape_fn(IxDyn(shape), |idx| {
        idx.slice().iter().fold(0usize, |acc, &i| acc * 31 + i)
    });

    let mut rebuilt = ArrayD::<usize>::zeros(IxDyn(shape));
    for (index, frame) in adapter.frames(data.view()).expect("frames") {
        adapter
            .write_frame(&mut rebuilt, index, frame)
            .expect("write back");
    }

    assert_eq!(rebuilt, data);
}

#[test]
fn test_round_trip_every_rank() {
    round_trip(&[5, 7]);
    round_trip(&[3, 5, 7]);
    round_trip(&[2, 3, 5, 7]);
}

#[test]
fn test_layouts() {
    let single = ShapeAdapter::from_shape(&[5, 7]).unwrap();
    assert_eq!(single.layout(), FrameLayout::Single);
    assert_eq!(single.n_frames(), 1);

    let cube = ShapeAdapter::from_shape(&[2, 3, 5, 7]).unwrap();
    assert_eq!(cube.frame_shape(), (5, 7));
    assert_eq!(cube.n_frames(), 6);
    assert!(cube.has_groups());

    let groups = cube.ordering_groups();
    assert_eq!(groups.len(), 2);
    assert!(groups
        .iter()
        .all(|g| g.len() == 3 && g.windows(2).all(|w| w[0].group + 1 == w[1].group)));
}

#[test]
fn test_unsupported_ranks_rejected() {
    for shape in [vec![4], vec![1, 2, 3, 4, 5]] {
        assert!(matches!(
            ShapeAdapter::from_shape(&shape),
            Err(DefectError::InvalidRank { .. })
        ));
    }

    let adapter = ShapeAdapter::from_shape(&[3, 4]).unwrap();
    let mut wrong = ArrayD::<bool>::from_elem(IxDyn(&[4, 3]), false);
    let frame = Array2::from_elem((3, 4), true);
    let index = adapter.frame_indices().next().unwrap();
    assert!(adapter.merge_frame(&mut wrong, index, frame.view()).is_err());
}
