use std::path::Path;

use nalgebra::{Isometry3, Vector3, point, vector};
use odal::Config;
use vidar::{
    BalanceConfig, BalanceController, Error, GRAVITY, Result,
    balance::BalanceInput,
    geometry::{ConvexPolygon, Point},
    planner::PlanPhase,
    terrain::{PlaneEquation, SteppableRegion},
    types::{Feet, Footstep, FootstepTiming, Side, Wrench},
};

const DT: f64 = 0.004;

fn shipped_config() -> Result<BalanceConfig> {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../config");
    Ok(BalanceConfig::load(dir)?)
}

fn feet() -> Feet<Isometry3<f64>> {
    Feet::new(Isometry3::translation(0.0, 0.1, 0.0), Isometry3::translation(0.0, -0.1, 0.0))
}

fn footsteps() -> Result<Vec<Footstep>> {
    let timing = FootstepTiming::new(0.6, 0.1)?;

    Ok(vec![
        Footstep::new(Side::Right, vector![0.3, -0.1, 0.0], 0.0, timing),
        Footstep::new(Side::Left, vector![0.6, 0.1, 0.0], 0.0, timing),
    ])
}

/// Swings the right foot for `ticks` ticks while the ICP is `push` ahead of its reference.
fn swing(controller: &mut BalanceController, footsteps: &[Footstep], push: f64, ticks: u32) -> Result<()> {
    let wrenches = Feet::new(
        Wrench::new(Vector3::zeros(), vector![0.0, 0.0, 150.0 * GRAVITY], 0.0),
        Wrench::default(),
    );
    let angular_velocities = Feet::new(Vector3::zeros(), Vector3::zeros());
    let foot_poses = feet();

    for tick in 0..ticks {
        let measured_icp: Point = controller.reference().icp + vector![push, 0.0];
        controller.tick(&BalanceInput {
            wrenches: &wrenches,
            foot_poses: &foot_poses,
            foot_angular_velocities: &angular_velocities,
            measured_icp,
            footsteps,
            phase: PlanPhase::Swing,
            time_in_phase: f64::from(tick) * DT,
        })?;
    }

    Ok(())
}

#[test]
fn shipped_config_matches_defaults() -> Result<()> {
    let config = shipped_config()?;
    config.validate()?;

    assert_eq!(config.planner, vidar::planner::PlannerConfig::default());
    assert_eq!(config.optimization, vidar::optimization::OptimizationConfig::default());
    assert_eq!(config.terrain, vidar::terrain::TerrainConfig::default());

    Ok(())
}

#[test]
fn push_moves_footstep_forward() -> Result<()> {
    let mut controller = BalanceController::new(&shipped_config()?)?;
    let footsteps = footsteps()?;

    swing(&mut controller, &footsteps, 0.25, 25)?;

    assert!(controller.contact_state(Side::Left).is_in_contact());
    assert!(!controller.contact_state(Side::Right).is_in_contact());

    let adjusted = controller.footsteps()[0].position_2d();
    assert!(adjusted.x > 0.32, "footstep was not moved forward: {adjusted}");
    assert!(adjusted.x <= 0.5 + 1e-6, "footstep left the reachable area: {adjusted}");

    let diagnostics = controller.diagnostics();
    assert!(diagnostics.optimization.residual_after < diagnostics.optimization.residual_before);

    // the desired CoP stays on the stance foot
    let stance = ConvexPolygon::rectangle(point![-0.11, 0.045], point![0.11, 0.155]).unwrap();
    assert!(stance.signed_distance(controller.desired_cop()) < 1e-6);

    Ok(())
}

#[test]
fn footstep_is_kept_on_steppable_region() -> Result<()> {
    let mut controller = BalanceController::new(&shipped_config()?)?;
    let region = SteppableRegion::new(
        PlaneEquation::horizontal(0.0),
        ConvexPolygon::rectangle(point![-1.0, -1.0], point![0.25, 1.0]).unwrap(),
    );
    assert!(controller.set_steppable_region(Some(region)));

    swing(&mut controller, &footsteps()?, 0.0, 10)?;

    // sole reaches 0.11 in front of the footstep, the region requires 0.04 clearance
    let constrained = controller.footsteps()[0].position_2d();
    assert!(constrained.x <= 0.1 + 1e-6, "footstep is not on the region: {constrained}");
    assert!(controller.diagnostics().terrain.footstep_changed);

    Ok(())
}

#[test]
fn too_many_footsteps() -> Result<()> {
    let mut controller = BalanceController::new(&shipped_config()?)?;
    let timing = FootstepTiming::new(0.6, 0.1)?;
    let footsteps: Vec<Footstep> = (1..=9)
        .map(|step| {
            let side = if step % 2 == 0 { Side::Left } else { Side::Right };
            Footstep::new(side, vector![0.3 * f64::from(step), side.sign() * 0.1, 0.0], 0.0, timing)
        })
        .collect();

    let result = swing(&mut controller, &footsteps, 0.0, 1);
    assert!(matches!(result, Err(Error::TooManyFootsteps { count: 9, capacity: 8 })));

    Ok(())
}
