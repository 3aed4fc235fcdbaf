use pvexplore::core::window::{tukey, WeightWindow};

#[test]
fn test_tukey_shape() {
    let w = tukey(101, 0.2);
    assert_eq!(w.len(), 101);

    // tapered ends, flat center
    assert!(w[0] < 1e-9);
    assert!(w[100] < 1e-9);
    assert_eq!(w[50], 1.0);

    // symmetric within floating tolerance
    for i in 0..101 {
        assert!((w[i] - w[100 - i]).abs() < 1e-9, "asymmetry at {}", i);
    }
    // monotone ramp on the leading edge
    for i in 0..10 {
        assert!(w[i] < w[i + 1]);
    }
}

#[test]
fn test_alpha_zero_is_rectangular() {
    let w = tukey(32, 0.0);
    assert!(w.iter().all(|&x| x == 1.0));
}

#[test]
fn test_weight_lookup() {
    let window = WeightWindow::new(102, 0.2);
    let bounds = (0.0, 1.0);

    // outside the bounds the candidate weighs nothing
    assert_eq!(window.weight(bounds, -0.01), 0.0);
    assert_eq!(window.weight(bounds, 1.01), 0.0);

    // center of the domain sits on the flat top
    assert_eq!(window.weight(bounds, 0.5), 1.0);

    // near the edges the weight tapers off
    assert!(window.weight(bounds, 0.01) < 0.5);
    assert!(window.weight(bounds, 0.99) < 0.5);

    // degenerate bounds weigh nothing
    assert_eq!(window.weight((1.0, 1.0), 1.0), 0.0);
}

#[test]
fn test_disabled_window_weighs_one() {
    let window = WeightWindow::disabled();
    assert!(!window.is_enabled());
    assert_eq!(window.weight((0.0, 1.0), 0.99), 1.0);
    assert_eq!(window.penalty(&[(0.0, 1.0)], &[0.99]), 1.0);
}

#[test]
fn test_penalty_discounts_edge_candidates() {
    let window = WeightWindow::new(102, 0.2);
    let bounds = vec![(0.0, 1.0), (0.0, 1.0)];

    let center = window.penalty(&bounds, &[0.5, 0.5]);
    assert!((center - 1.0).abs() < 1e-9);

    let edge = window.penalty(&bounds, &[0.99, 0.5]);
    assert!(edge < center);
    assert!(edge > 0.0);
}
