use approx::assert_abs_diff_eq;
use backend::{ComputeBackend, CpuBackend, DenseTensor, ExchangePattern, C64};

fn real(shape: Vec<usize>, values: &[f64]) -> DenseTensor {
    DenseTensor::new(shape, values.iter().map(|&x| C64::new(x, 0.0)).collect()).unwrap()
}

fn reconstruct(b: &dyn ComputeBackend, t: &DenseTensor, row_axes: &[usize]) -> DenseTensor {
    let f = b.svd(t, row_axes, usize::MAX, 0.0).unwrap();
    let k = f.rank();
    let mut us = f.u.clone();
    let rows = us.len() / k;
    for r in 0..rows {
        for j in 0..k {
            us.data_mut()[r * k + j] *= f.s[j];
        }
    }
    let u_rank = us.rank();
    b.contract(&us, &f.vh, &[u_rank - 1], &[0]).unwrap()
}

#[test]
fn contract_matches_matrix_product() {
    let b = CpuBackend::serial();
    let x = real(vec![2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let y = real(vec![3, 2], &[7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
    let z = b.contract(&x, &y, &[1], &[0]).unwrap();
    assert_eq!(z.shape(), &[2, 2]);
    let expected = [58.0, 64.0, 139.0, 154.0];
    for (got, want) in z.data().iter().zip(expected) {
        assert_abs_diff_eq!(got.re, want, epsilon = 1e-12);
    }
}

#[test]
fn contract_rejects_dimension_mismatch() {
    let b = CpuBackend::serial();
    let x = DenseTensor::zeros(vec![2, 3]);
    let y = DenseTensor::zeros(vec![2, 2]);
    assert!(b.contract(&x, &y, &[1], &[0]).is_err());
}

#[test]
fn serial_and_rayon_contractions_are_bit_identical() {
    let values: Vec<C64> = (0..64)
        .map(|i| C64::new((i as f64 * 0.37).sin(), (i as f64 * 0.11).cos()))
        .collect();
    let x = DenseTensor::new(vec![4, 4, 4], values.clone()).unwrap();
    let y = DenseTensor::new(vec![4, 16], values).unwrap();
    let s = CpuBackend::serial().contract(&x, &y, &[2], &[0]).unwrap();
    let p = CpuBackend::rayon().contract(&x, &y, &[2], &[0]).unwrap();
    for (a, b) in s.data().iter().zip(p.data()) {
        assert_eq!(a.re.to_bits(), b.re.to_bits());
        assert_eq!(a.im.to_bits(), b.im.to_bits());
    }
}

#[test]
fn full_rank_svd_reconstructs_input() {
    let b = CpuBackend::serial();
    let t = real(vec![2, 2, 3], &[
        0.1, -0.4, 0.3, 0.9, 0.2, -0.7, 0.5, 0.5, -0.1, 0.0, 0.8, 0.6,
    ]);
    let back = reconstruct(&b, &t, &[0, 1]);
    for (x, y) in back.data().iter().zip(t.data()) {
        assert_abs_diff_eq!((x - y).norm(), 0.0, epsilon = 1e-12);
    }
}

#[test]
fn svd_truncation_reports_dropped_weight() {
    let b = CpuBackend::serial();
    let t = real(vec![3, 3], &[3.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 1.0]);
    let f = b.svd(&t, &[0], 2, 0.0).unwrap();
    assert_eq!(f.rank(), 2);
    assert_abs_diff_eq!(f.s[0], 3.0, epsilon = 1e-12);
    assert_abs_diff_eq!(f.s[1], 2.0, epsilon = 1e-12);
    assert_abs_diff_eq!(f.truncation_error, 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(f.total_weight, 14.0, epsilon = 1e-12);
}

#[test]
fn svd_keeps_at_least_one_value() {
    let b = CpuBackend::serial();
    let f = b.svd(&DenseTensor::zeros(vec![2, 2]), &[0], 4, 1e-12).unwrap();
    assert_eq!(f.rank(), 1);
}

#[test]
fn marked_rank_breaks_exchange_until_restored() {
    let b = CpuBackend::serial();
    let send = vec![vec![C64::new(1.0, 0.0)], vec![C64::new(2.0, 0.0)]];
    let mut recv = vec![Vec::new(), Vec::new()];
    let pattern = ExchangePattern::Pairwise { partners: vec![1, 0] };

    b.mark_unreachable(1);
    assert!(b.collective_exchange(&send, &mut recv, &pattern).is_err());

    b.mark_reachable(1);
    b.collective_exchange(&send, &mut recv, &pattern).unwrap();
    assert_eq!(recv[0][0].re, 2.0);
}
