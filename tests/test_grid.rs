use pvexplore::core::grid::{linspace_or_pin, sample_grid};

#[test]
fn test_two_parameter_odometer_ordering() {
    let a = vec![1.0, 2.0, 3.0];
    let b = vec![10.0, 20.0];
    let rows = sample_grid(&[a, b]);

    // 3 x 2 rows, second parameter least significant
    let expected = vec![
        vec![1.0, 10.0],
        vec![1.0, 20.0],
        vec![2.0, 10.0],
        vec![2.0, 20.0],
        vec![3.0, 10.0],
        vec![3.0, 20.0],
    ];
    assert_eq!(rows, expected);
}

#[test]
fn test_three_parameter_row_count_and_extremes() {
    let rows = sample_grid(&[
        vec![0.0, 1.0],
        vec![0.0, 0.5, 1.0],
        vec![7.0],
    ]);
    assert_eq!(rows.len(), 6);
    assert_eq!(rows[0], vec![0.0, 0.0, 7.0]);
    assert_eq!(rows[5], vec![1.0, 1.0, 7.0]);
    // pinned parameter is constant across every row
    assert!(rows.iter().all(|r| r[2] == 7.0));
}

#[test]
fn test_linspace_endpoints_and_pinning() {
    let samples = linspace_or_pin(0.0, 1.0, 0.3, 5);
    assert_eq!(samples.len(), 5);
    assert_eq!(samples[0], 0.0);
    assert_eq!(samples[4], 1.0);
    assert!((samples[2] - 0.5).abs() < 1e-12);

    // a single point collapses to the initial value, not the range start
    assert_eq!(linspace_or_pin(0.0, 1.0, 0.3, 1), vec![0.3]);
}

#[test]
fn test_empty_input_yields_empty_grid() {
    assert!(sample_grid(&[]).is_empty());
    assert!(sample_grid(&[vec![1.0], vec![]]).is_empty());
}
