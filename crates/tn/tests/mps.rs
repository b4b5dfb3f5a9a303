use approx::assert_abs_diff_eq;
use backend::CpuBackend;
use tn::{BudgetConfig, BudgetPolicy, Mps, TnError, Truncation, C64};

fn hadamard() -> [[C64; 2]; 2] {
    let s = 1.0 / 2.0_f64.sqrt();
    [
        [C64::new(s, 0.0), C64::new(s, 0.0)],
        [C64::new(s, 0.0), C64::new(-s, 0.0)],
    ]
}

fn ry(theta: f64) -> [[C64; 2]; 2] {
    let c = (theta / 2.0).cos();
    let s = (theta / 2.0).sin();
    [
        [C64::new(c, 0.0), C64::new(-s, 0.0)],
        [C64::new(s, 0.0), C64::new(c, 0.0)],
    ]
}

fn cnot() -> [[C64; 4]; 4] {
    let z = C64::new(0.0, 0.0);
    let o = C64::new(1.0, 0.0);
    [
        [o, z, z, z],
        [z, o, z, z],
        [z, z, z, o],
        [z, z, o, z],
    ]
}

fn wide() -> Truncation {
    Truncation {
        max_bond: 64,
        cutoff: 1e-14,
    }
}

#[test]
fn zero_state_is_normalized_product() {
    let psi = Mps::new_zero(4, wide(), BudgetConfig::default());
    assert_abs_diff_eq!(psi.norm_sqr(), 1.0, epsilon = 1e-14);
    let dense = psi.to_dense();
    assert_eq!(dense.len(), 16);
    assert_abs_diff_eq!(dense[0].re, 1.0, epsilon = 1e-14);
    assert_eq!(psi.max_bond_dim(), 1);
}

#[test]
fn bell_pair_has_one_bit_of_entropy() {
    let b = CpuBackend::serial();
    let mut psi = Mps::new_zero(2, wide(), BudgetConfig::default());
    psi.apply_1q(0, &hadamard()).unwrap();
    psi.apply_2q_adjacent(&b, 0, &cnot()).unwrap();

    let amps = psi.to_dense();
    let s = 1.0 / 2.0_f64.sqrt();
    assert_abs_diff_eq!(amps[0].re, s, epsilon = 1e-12);
    assert_abs_diff_eq!(amps[1].norm(), 0.0, epsilon = 1e-12);
    assert_abs_diff_eq!(amps[2].norm(), 0.0, epsilon = 1e-12);
    assert_abs_diff_eq!(amps[3].re, s, epsilon = 1e-12);
    assert_abs_diff_eq!(psi.bond_entropy(&b, 0).unwrap(), 1.0, epsilon = 1e-9);
    assert_eq!(psi.truncation_error(), 0.0);
}

#[test]
fn non_adjacent_gate_restores_qubit_order() {
    let b = CpuBackend::serial();
    let mut psi = Mps::new_zero(4, wide(), BudgetConfig::default());
    psi.apply_1q(0, &hadamard()).unwrap();
    psi.apply_2q(&b, 0, 3, &cnot()).unwrap();

    let amps = psi.to_dense();
    let s = 1.0 / 2.0_f64.sqrt();
    for (i, a) in amps.iter().enumerate() {
        let want = if i == 0b0000 || i == 0b1001 { s } else { 0.0 };
        assert_abs_diff_eq!(a.norm(), want, epsilon = 1e-12);
    }
}

#[test]
fn reversed_targets_use_reversed_control() {
    let b = CpuBackend::serial();
    let mut psi = Mps::new_zero(3, wide(), BudgetConfig::default());
    psi.apply_1q(2, &hadamard()).unwrap();
    // control on site 2, target on site 0
    psi.apply_2q(&b, 2, 0, &cnot()).unwrap();

    let amps = psi.to_dense();
    let s = 1.0 / 2.0_f64.sqrt();
    assert_abs_diff_eq!(amps[0b000].norm(), s, epsilon = 1e-12);
    assert_abs_diff_eq!(amps[0b101].norm(), s, epsilon = 1e-12);
    assert_abs_diff_eq!(psi.norm_sqr(), 1.0, epsilon = 1e-12);
}

#[test]
fn moving_the_center_keeps_the_state() {
    let b = CpuBackend::serial();
    let mut psi = Mps::new_zero(5, wide(), BudgetConfig::default());
    for k in 0..5 {
        psi.apply_1q(k, &ry(0.3 + k as f64 * 0.2)).unwrap();
    }
    for k in 0..4 {
        psi.apply_2q_adjacent(&b, k, &cnot()).unwrap();
    }
    let before = psi.to_dense();
    psi.canonicalize(&b).unwrap();
    assert_eq!(psi.center(), 0);
    psi.move_center(&b, 3).unwrap();
    assert_eq!(psi.center(), 3);
    for (x, y) in psi.to_dense().iter().zip(&before) {
        assert_abs_diff_eq!((x - y).norm(), 0.0, epsilon = 1e-12);
    }
}

#[test]
fn from_dense_round_trips() {
    let b = CpuBackend::serial();
    let raw: Vec<C64> = (0..8)
        .map(|i| C64::new((i as f64 + 1.0).sqrt(), 0.1 * i as f64))
        .collect();
    let norm: f64 = raw.iter().map(|z| z.norm_sqr()).sum::<f64>().sqrt();
    let amps: Vec<C64> = raw.iter().map(|z| z / norm).collect();

    let psi = Mps::from_dense(&b, &amps, wide(), BudgetConfig::default()).unwrap();
    assert_eq!(psi.len(), 3);
    for (x, y) in psi.to_dense().iter().zip(&amps) {
        assert_abs_diff_eq!((x - y).norm(), 0.0, epsilon = 1e-12);
    }
}

#[test]
fn bond_cap_records_discarded_weight() {
    let b = CpuBackend::serial();
    let trunc = Truncation {
        max_bond: 1,
        cutoff: 0.0,
    };
    let budget = BudgetConfig {
        threshold: 1.0,
        policy: BudgetPolicy::Warn,
        ..Default::default()
    };
    let mut psi = Mps::new_zero(2, trunc, budget);
    psi.apply_1q(0, &ry(1.0)).unwrap();
    let discarded = psi.apply_2q_adjacent(&b, 0, &cnot()).unwrap();

    // Schmidt weights are cos^2(0.5) and sin^2(0.5); the smaller one goes
    let expected = (0.5f64).sin().powi(2);
    assert_abs_diff_eq!(discarded, expected, epsilon = 1e-12);
    assert_abs_diff_eq!(psi.truncation_error(), expected, epsilon = 1e-12);
    assert_abs_diff_eq!(psi.norm_sqr(), 1.0, epsilon = 1e-12);
    assert_eq!(psi.max_bond_dim(), 1);
}

#[test]
fn fail_policy_reports_accumulated_error() {
    let b = CpuBackend::serial();
    let trunc = Truncation {
        max_bond: 1,
        cutoff: 0.0,
    };
    let budget = BudgetConfig {
        threshold: 1e-6,
        ..Default::default()
    };
    let mut psi = Mps::new_zero(2, trunc, budget);
    psi.apply_1q(0, &hadamard()).unwrap();
    let before = psi.to_dense();

    match psi.apply_2q_adjacent(&b, 0, &cnot()) {
        Err(TnError::TruncationBudgetExceeded { accumulated, threshold }) => {
            assert_abs_diff_eq!(accumulated, 0.5, epsilon = 1e-12);
            assert_eq!(threshold, 1e-6);
        }
        other => panic!("expected budget error, got {:?}", other.map(|_| ())),
    }
    for (x, y) in psi.to_dense().iter().zip(&before) {
        assert_abs_diff_eq!((x - y).norm(), 0.0, epsilon = 1e-12);
    }
}

#[test]
fn site_density_of_plus_state() {
    let mut psi = Mps::new_zero(3, wide(), BudgetConfig::default());
    psi.apply_1q(1, &hadamard()).unwrap();
    let rho = psi.site_density(1).unwrap();
    for row in rho {
        for z in row {
            assert_abs_diff_eq!(z.re, 0.5, epsilon = 1e-12);
        }
    }
}

#[test]
fn out_of_range_site_is_rejected() {
    let b = CpuBackend::serial();
    let mut psi = Mps::new_zero(2, wide(), BudgetConfig::default());
    assert!(matches!(
        psi.apply_2q(&b, 0, 2, &cnot()),
        Err(TnError::SiteOutOfRange { site: 2, len: 2 })
    ));
    assert!(matches!(
        psi.apply_2q(&b, 1, 1, &cnot()),
        Err(TnError::RepeatedSite(1))
    ));
}
