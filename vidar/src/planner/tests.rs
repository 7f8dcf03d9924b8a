use nalgebra::{Isometry3, point, vector};

use super::*;

const SWING: f64 = 0.6;
const TRANSFER: f64 = 0.1;

fn feet() -> Feet<Isometry3<f64>> {
    Feet::new(Isometry3::translation(0.0, 0.1, 0.0), Isometry3::translation(0.0, -0.1, 0.0))
}

fn timing() -> FootstepTiming {
    FootstepTiming::new(SWING, TRANSFER).unwrap()
}

fn footsteps() -> Vec<Footstep> {
    vec![
        Footstep::new(Side::Right, vector![0.3, -0.1, 0.0], 0.0, timing()),
        Footstep::new(Side::Left, vector![0.6, 0.1, 0.0], 0.1, timing()),
        Footstep::new(Side::Right, vector![0.9, -0.1, 0.0], 0.0, timing()),
    ]
}

fn planner(config: &PlannerConfig, phase: PlanPhase) -> IcpPlanner {
    let mut planner = IcpPlanner::new(config).unwrap();
    planner.compute_plan(&feet(), &footsteps(), phase).unwrap();
    planner
}

fn total_duration(planner: &IcpPlanner) -> f64 {
    planner.segments().last().unwrap().end_time()
}

#[test]
fn icp_velocity_follows_dynamics() {
    for phase in [PlanPhase::Transfer, PlanPhase::Swing] {
        let config = PlannerConfig::default();
        let planner = planner(&config, phase);
        let omega = config.omega;
        let h = 1e-6;

        let mut time = 0.0013;
        while time < total_duration(&planner) - h {
            let state = planner.compute(time);
            let expected = omega * (state.icp - state.cmp);
            assert!((state.icp_velocity - expected).norm() < 1e-9);

            let numeric = (planner.compute(time + h).icp - planner.compute(time - h).icp) / (2.0 * h);
            assert!(
                (numeric - state.icp_velocity).norm() < 1e-5,
                "numeric velocity {numeric} differs from {} at {time}",
                state.icp_velocity
            );

            time += 0.0137;
        }
    }
}

#[test]
fn segments_are_continuous() {
    let planner = planner(&PlannerConfig::default(), PlanPhase::Transfer);
    let segments = planner.segments();

    for index in 0..segments.len() - 1 {
        let end = planner.evaluate_segment(index, segments[index].duration);
        let start = planner.evaluate_segment(index + 1, 0.0);

        assert!((end.icp - start.icp).norm() < 1e-8, "ICP jumps after segment {index}");
        assert!((end.icp_velocity - start.icp_velocity).norm() < 1e-8);
        assert!((end.cmp - start.cmp).norm() < 1e-8);
        assert!((end.angular_momentum - start.angular_momentum).norm() < 1e-8);
        assert!((segments[index].end_time() - segments[index + 1].start_time).abs() < 1e-12);
    }
}

#[test]
fn comes_to_rest_between_last_footsteps() {
    let planner = planner(&PlannerConfig::default(), PlanPhase::Transfer);
    let state = planner.compute(100.0);

    assert!((state.icp - point![0.75, 0.0]).norm() < 1e-9);
    assert!(state.icp_velocity.norm() < 1e-9);
    assert!((planner.final_icp().unwrap() - point![0.75, 0.0]).norm() < 1e-9);
}

#[test]
fn standing_holds_mid_feet() {
    let mut planner = IcpPlanner::new(&PlannerConfig::default()).unwrap();
    planner.compute_plan(&feet(), &[], PlanPhase::Transfer).unwrap();

    for time in [0.0, 0.1, 0.5] {
        let state = planner.compute(time);
        assert!(state.icp.coords.norm() < 1e-12);
        assert!(state.icp_velocity.norm() < 1e-12);
    }
    assert!(planner.icp_at_end_of_current_step().is_none());
    assert!(planner.time_remaining_in_current_step(0.0).abs() < f64::EPSILON);
}

#[test]
fn swing_phase_skips_first_transfer() {
    let config = PlannerConfig::default();
    let transfer = planner(&config, PlanPhase::Transfer);
    let swing = planner(&config, PlanPhase::Swing);

    assert_eq!(transfer.segments()[0].kind, SegmentKind::Transfer);
    assert_eq!(swing.segments()[0].kind, SegmentKind::SwingEntry);
    assert!((total_duration(&transfer) - total_duration(&swing) - TRANSFER).abs() < 1e-12);
}

#[test]
fn time_remaining_in_current_step() {
    let planner = planner(&PlannerConfig::default(), PlanPhase::Transfer);

    assert!((planner.current_step_end_time().unwrap() - (TRANSFER + SWING)).abs() < 1e-12);
    assert!((planner.time_remaining_in_current_step(0.2) - 0.5).abs() < 1e-12);
    assert!(planner.time_remaining_in_current_step(5.0).abs() < f64::EPSILON);

    let end_icp = planner.icp_at_end_of_current_step().unwrap();
    assert!((planner.compute(TRANSFER + SWING).icp - end_icp).norm() < 1e-12);
}

#[test]
fn recursion_multipliers_decay() {
    let planner = planner(&PlannerConfig::default(), PlanPhase::Swing);
    let multipliers = planner.recursion_multipliers();

    assert_eq!(multipliers.len(), 3);
    assert!(multipliers[0] < 1.0);
    assert!(multipliers[0] > multipliers[1]);
    assert!(multipliers[1] > multipliers[2]);
    assert!(multipliers[2] > 0.0);
    assert!(planner.footstep_recursion_multiplier(7).abs() < f64::EPSILON);
}

#[test]
fn recursion_multiplier_predicts_footstep_change() {
    let config = PlannerConfig {
        use_angular_momentum: false,
        ..Default::default()
    };
    let mut planner = IcpPlanner::new(&config).unwrap();
    planner.compute_plan(&feet(), &footsteps(), PlanPhase::Swing).unwrap();
    let nominal = planner.icp_at_end_of_current_step().unwrap();

    for index in 0..3 {
        let multiplier = planner.footstep_recursion_multiplier(index);
        let mut moved = footsteps();
        let position = moved[index].position_2d();
        moved[index].set_position_2d(position + vector![0.0, 0.02]);

        let mut perturbed = IcpPlanner::new(&config).unwrap();
        perturbed.compute_plan(&feet(), &moved, PlanPhase::Swing).unwrap();
        let change = perturbed.icp_at_end_of_current_step().unwrap() - nominal;

        assert!((change - vector![0.0, 0.02 * multiplier]).norm() < 1e-9);
    }
}

#[test]
fn swing_angular_momentum() {
    let config = PlannerConfig::default();
    let planner = planner(&config, PlanPhase::Swing);
    let h = 1e-6;

    let mid_swing = planner.compute(0.1);
    assert!((mid_swing.cmp - mid_swing.cop).norm() > 1e-4);

    for time in [0.05, 0.21, 0.37, 0.55] {
        let state = planner.compute(time);
        let numeric = (planner.compute(time + h).angular_momentum
            - planner.compute(time - h).angular_momentum)
            / (2.0 * h);
        assert!((numeric - state.centroidal_torque).norm() < 1e-5);
    }

    assert!(planner.compute(SWING).angular_momentum.norm() < 1e-9);
    assert!(planner.compute(SWING + 0.05).angular_momentum.norm() < 1e-12);
}

#[test]
fn zero_transfer_is_skipped() {
    let mut footsteps = footsteps();
    for footstep in &mut footsteps {
        footstep.timing = FootstepTiming::new(SWING, 0.0).unwrap();
    }

    let mut planner = IcpPlanner::new(&PlannerConfig::default()).unwrap();
    planner.compute_plan(&feet(), &footsteps, PlanPhase::Transfer).unwrap();

    assert!(
        planner
            .segments()
            .iter()
            .all(|segment| segment.kind != SegmentKind::Transfer)
    );
    for state in [planner.compute(0.0), planner.compute(1.0)] {
        assert!(state.icp.coords.iter().all(|value| value.is_finite()));
    }
}

#[test]
fn entry_offsets_are_mirrored() {
    let config = PlannerConfig {
        entry_offset: vector![0.0, 0.02],
        use_angular_momentum: false,
        ..Default::default()
    };
    let planner = planner(&config, PlanPhase::Swing);

    // the first swing is on the right foot, so the left foot is the stance foot
    let entry = planner.compute(0.01).cmp;
    assert!((entry - point![0.0, 0.08]).norm() < 1e-12);
}

#[test]
fn too_many_footsteps() {
    let config = PlannerConfig {
        max_number_of_footsteps: 2,
        ..Default::default()
    };
    let mut planner = IcpPlanner::new(&config).unwrap();

    assert!(matches!(
        planner.compute_plan(&feet(), &footsteps(), PlanPhase::Transfer),
        Err(Error::TooManyFootsteps {
            count: 3,
            capacity: 2
        })
    ));
}

#[test]
fn invalid_swing_split_is_rejected() {
    let config = PlannerConfig {
        swing_spline_start_fraction: 0.9,
        swing_spline_end_fraction: 0.5,
        ..Default::default()
    };

    assert!(matches!(IcpPlanner::new(&config), Err(Error::InvalidSwingSplit { .. })));
}

#[test]
fn reset_clears_plan() {
    let mut planner = planner(&PlannerConfig::default(), PlanPhase::Transfer);
    planner.reset();

    assert!(planner.segments().is_empty());
    assert_eq!(planner.compute(0.3), ReferenceState::default());
    assert!(planner.icp_at_end_of_current_step().is_none());
}
