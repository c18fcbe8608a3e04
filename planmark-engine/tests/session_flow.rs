use planmark_core::design::{ContainmentType, EntityKind, PanelOrientation, PvPanelConfig, VoltageClass};
use planmark_core::geometry::Point2;
use planmark_engine::command::{CommandBus, CommandContext, CommandRequest};
use planmark_engine::drawing::{DetailsPayload, DrawingTool};
use planmark_engine::pv::ArrayConfig;
use planmark_engine::session::{MarkupSession, SessionCommand, SessionEvent, SessionSettings, Tool};

fn apply(session: &mut MarkupSession, command: SessionCommand) -> SessionEvent {
    session
        .apply(command)
        .unwrap_or_else(|err| panic!("command failed: {err}"))
}

fn click(session: &mut MarkupSession, x: f64, y: f64) -> SessionEvent {
    apply(session, SessionCommand::Click(Point2::new(x, y)))
}

fn calibrated() -> MarkupSession {
    let mut session = MarkupSession::new(SessionSettings::default());
    apply(&mut session, SessionCommand::SelectTool(Tool::Calibrate));
    click(&mut session, 0.0, 0.0);
    click(&mut session, 100.0, 0.0);
    apply(&mut session, SessionCommand::SubmitRealLength("10".into()));
    session
}

#[test]
fn square_zone_measures_one_hundred_square_metres() {
    let mut session = calibrated();
    apply(&mut session, SessionCommand::SelectTool(Tool::Draw(DrawingTool::Zone)));
    for (x, y) in [(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)] {
        click(&mut session, x, y);
    }
    let event = apply(&mut session, SessionCommand::Finish);
    assert!(matches!(event, SessionEvent::Committed { kind: EntityKind::Zone, .. }));
    assert!((session.state().zones[0].area_m2 - 100.0).abs() < 1e-9);
}

#[test]
fn undo_redo_round_trip_is_structurally_identical() {
    let mut session = calibrated();
    apply(
        &mut session,
        SessionCommand::SelectTool(Tool::Draw(DrawingTool::Containment(ContainmentType::Conduit))),
    );
    click(&mut session, 0.0, 0.0);
    apply(&mut session, SessionCommand::DoubleClick(Point2::new(0.0, 250.0)));
    let before = session.state().clone();
    assert!((before.containment[0].length - 25.0).abs() < 1e-9);

    apply(&mut session, SessionCommand::Undo);
    assert!(session.state().containment.is_empty());
    apply(&mut session, SessionCommand::Redo);
    assert_eq!(session.state(), &before);
}

#[test]
fn commit_after_undo_discards_redo_branch() {
    let mut session = calibrated();
    let s0_len = session.history().len();
    apply(&mut session, SessionCommand::SetDesignPurpose("office".into()));
    apply(&mut session, SessionCommand::SetDesignPurpose("warehouse".into()));
    apply(&mut session, SessionCommand::Undo);
    apply(&mut session, SessionCommand::SetDesignPurpose("school".into()));

    let purposes: Vec<&str> = session.history().states()[s0_len - 1..]
        .iter()
        .map(|state| state.design_purpose.as_str())
        .collect();
    assert_eq!(purposes, vec!["", "office", "school"]);
    assert_eq!(apply(&mut session, SessionCommand::Redo), SessionEvent::Unchanged);
}

#[test]
fn noop_commits_do_not_grow_history() {
    let mut session = calibrated();
    apply(&mut session, SessionCommand::SetDesignPurpose("retail".into()));
    let len = session.history().len();
    let event = apply(&mut session, SessionCommand::SetDesignPurpose("retail".into()));
    assert_eq!(event, SessionEvent::Updated { committed: false });
    assert_eq!(session.history().len(), len);
}

#[test]
fn failed_commands_leave_state_untouched() {
    let mut session = calibrated();
    apply(
        &mut session,
        SessionCommand::SelectTool(Tool::Draw(DrawingTool::Line(VoltageClass::LvAc))),
    );
    click(&mut session, 0.0, 0.0);
    click(&mut session, 10.0, 0.0);
    apply(&mut session, SessionCommand::Finish);
    let snapshot = session.state().clone();
    let len = session.history().len();

    let err = session
        .apply(SessionCommand::SubmitDetails(DetailsPayload::ContainmentSize("50mm".into())))
        .unwrap_err();
    assert!(err.to_string().contains("invalid details"));
    assert!(session.apply(SessionCommand::SubmitRealLength("abc".into())).is_err());
    assert!(session.apply(SessionCommand::ConfirmDelete(true)).is_err());
    assert_eq!(session.state(), &snapshot);
    assert_eq!(session.history().len(), len);
}

#[test]
fn pv_capacity_follows_placed_arrays() {
    let mut session = calibrated();
    apply(
        &mut session,
        SessionCommand::SetPanelConfig(PvPanelConfig {
            length_m: 1.7,
            width_m: 1.1,
            wattage: 425.0,
        }),
    );
    apply(&mut session, SessionCommand::SelectTool(Tool::Draw(DrawingTool::RoofMask)));
    for (x, y) in [(0.0, 0.0), (600.0, 0.0), (600.0, 300.0), (0.0, 300.0)] {
        click(&mut session, x, y);
    }
    apply(&mut session, SessionCommand::Finish);
    apply(&mut session, SessionCommand::SubmitPitch(20.0));
    click(&mut session, 300.0, 5.0);
    click(&mut session, 300.0, 295.0);
    apply(
        &mut session,
        SessionCommand::ConfigureArray(ArrayConfig {
            rows: 2,
            columns: 4,
            orientation: PanelOrientation::Portrait,
        }),
    );
    click(&mut session, 20.0, 20.0);
    click(&mut session, 300.0, 20.0);

    let summary = session.state().summary();
    assert_eq!(summary.roof_masks, 1);
    assert_eq!(summary.pv_arrays, 2);
    assert_eq!(summary.pv_panels, 16);
    assert!((summary.pv_capacity_kwp.unwrap() - 6.8).abs() < 1e-9);
}

#[test]
fn text_commands_drive_the_same_reducer() {
    let bus = CommandBus::new();
    let mut session = MarkupSession::default();
    let script = "\
# 标定
calibrate
click 0 0
click 200 0
length 20
tool line lv
click 0 0
click 0 100
finish
cable 4C-16mm 2.5 1.5 2 DB1 feed
";
    for line in script.lines() {
        let Some(request) = CommandRequest::parse(line) else {
            continue;
        };
        let mut context = CommandContext {
            session: &mut session,
        };
        let response = bus.dispatch(&request, &mut context);
        assert!(response.success, "{line}: {:?}", response.message);
    }
    let line = &session.state().lines[0];
    assert_eq!(line.label(), "DB1 feed");
    assert!((line.total_length() - 14.0).abs() < 1e-9);
    assert_eq!(line.total_length(), line.path_length() + line.start_height_m() + line.end_height_m());
}
