//! End-to-end flows over the in-memory store: plan entry, approval, tick
//! reconciliation and the monthly projection working together.

use anyhow::Result;
use chrono::NaiveDate;
use std::sync::Arc;

use wfm_core::config::NetworkSettings;
use wfm_core::events::{CoreEvent, EventBus};
use wfm_core::model::calendar::ProductionCalendar;
use wfm_core::model::permission::{EmployeeScope, ShopScope};
use wfm_core::model::worker_day::{GraphType, WorkerDaySource};
use wfm_core::model::{
    AttendanceRecord, AttendanceType, BreakPolicy, BreakRule, Employee, Employment, Group,
    GroupWorkerDayPermission, OrgDirectory, Position, Shop, WdPermissionAction, WorkerDay,
};
use wfm_core::registry::DayTypeRegistry;
use wfm_core::service::approval::{ApprovalEngine, ApprovalScope};
use wfm_core::service::batch::{BatchMutator, BatchRequest, IntentOutcome, WorkerDayIntent, WorkerDayPayload};
use wfm_core::service::permissions::PermissionEvaluator;
use wfm_core::service::reconcile::AttendanceReconciler;
use wfm_core::service::timesheet::TimesheetProjector;
use wfm_core::service::RequestCtx;
use wfm_core::store::memory::InMemoryStore;
use wfm_core::store::{QuerySpec, WorkerDayStore, WriteOp};

const ACTOR: u64 = 5;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn ctx() -> RequestCtx {
    RequestCtx::new(ACTOR, d(2024, 3, 10))
}

struct Env {
    store: Arc<InMemoryStore>,
    batch: BatchMutator,
    approval: ApprovalEngine,
    reconciler: Arc<AttendanceReconciler>,
    projector: TimesheetProjector,
    bus: EventBus,
}

fn org(break_rules: Vec<BreakRule>) -> Arc<OrgDirectory> {
    let mut org = OrgDirectory::new();
    org.employees.insert(1, Employee { id: 1, user_id: 100, tabel_code: Some("E1".into()) });
    org.shops.insert(
        1,
        Shop { id: 1, network_id: 1, title: "Sh1".into(), region_id: None, break_policy_id: Some(1) },
    );
    org.break_policies.insert(1, BreakPolicy::new(1, "std", break_rules));
    org.positions.insert(
        1,
        Position {
            id: 1,
            title: "clerk".into(),
            hours_in_a_week: 40.0,
            break_policy_id: None,
            default_work_type_id: None,
        },
    );
    org.employments.push(Employment {
        id: 1,
        employee_id: 1,
        shop_id: 1,
        position_id: 1,
        norm_work_hours: 100.0,
        dt_hired: d(2024, 1, 1),
        dt_fired: None,
        week_availability: None,
        dttm_deleted: None,
    });
    org.groups.insert(10, Group { id: 10, network_id: 1, name: "manager".into(), subordinate_ids: vec![] });
    org.user_groups.insert(ACTOR, vec![10]);
    org.user_networks.insert(ACTOR, 1);
    org.user_networks.insert(100, 1);

    // the manager may do anything with the common day types
    let mut next_id = 1;
    for action in [
        WdPermissionAction::Create,
        WdPermissionAction::Update,
        WdPermissionAction::Delete,
        WdPermissionAction::Approve,
    ] {
        for graph_type in [GraphType::Plan, GraphType::Fact] {
            for day_type in ["W", "H", "V", "S"] {
                org.wd_permissions.push(GroupWorkerDayPermission {
                    id: next_id,
                    group_id: 10,
                    action,
                    graph_type,
                    day_type: day_type.into(),
                    employee_scope: EmployeeScope::MyNetworkEmployees,
                    shop_scope: ShopScope::MyNetworkShops,
                    limit_days_in_past: None,
                    limit_days_in_future: None,
                    allow_actions_on_vacancies: true,
                });
                next_id += 1;
            }
        }
    }
    Arc::new(org)
}

fn env_with(settings: NetworkSettings, break_rules: Vec<BreakRule>) -> Env {
    let org = org(break_rules);
    let bus = EventBus::default();
    let registry = Arc::new(DayTypeRegistry::with_builtin(bus.clone()));
    let store = Arc::new(InMemoryStore::new(
        Arc::clone(&registry),
        settings.clone(),
        Arc::clone(&org),
    ));
    let dyn_store: Arc<dyn WorkerDayStore> = Arc::clone(&store) as Arc<dyn WorkerDayStore>;
    let perms = Arc::new(PermissionEvaluator::new(
        Arc::clone(&org),
        Arc::clone(&registry),
        &settings,
    ));
    let reconciler = Arc::new(AttendanceReconciler::new(
        Arc::clone(&dyn_store),
        Arc::clone(&registry),
        Arc::clone(&org),
        settings.clone(),
        bus.clone(),
    ));
    let batch = BatchMutator::new(
        Arc::clone(&dyn_store),
        Arc::clone(&perms),
        Arc::clone(&org),
        settings.clone(),
        bus.clone(),
    );
    let approval = ApprovalEngine::new(
        Arc::clone(&dyn_store),
        perms,
        settings.clone(),
        bus.clone(),
    )
    .with_reconciler(Arc::clone(&reconciler));
    let projector = TimesheetProjector::new(
        dyn_store,
        registry,
        org,
        Arc::new(ProductionCalendar::new()),
        settings,
        bus.clone(),
    );
    Env { store, batch, approval, reconciler, projector, bus }
}

fn env() -> Env {
    env_with(
        NetworkSettings::default(),
        vec![BreakRule { min_shift_minutes: 540, breaks_minutes: vec![30, 30, 15] }],
    )
}

fn shift_payload(dt: NaiveDate, start: (u32, u32), end_h: (u32, u32)) -> WorkerDayPayload {
    WorkerDayPayload {
        type_code: "W".into(),
        shop_id: Some(1),
        dttm_work_start: dt.and_hms_opt(start.0, start.1, 0),
        dttm_work_end: dt.and_hms_opt(end_h.0, end_h.1, 0),
        details: Vec::new(),
        source: WorkerDaySource::ManualFull,
        cost_per_hour: None,
        work_hours: None,
    }
}

async fn create_draft(env: &Env, dt: NaiveDate) -> Result<()> {
    let out = env
        .batch
        .mutate(
            &ctx(),
            BatchRequest {
                graph_type: GraphType::Plan,
                approved: false,
                partial: false,
                intents: vec![WorkerDayIntent {
                    employee_id: 1,
                    dt,
                    payload: Some(shift_payload(dt, (9, 0), (18, 0))),
                }],
            },
        )
        .await?;
    assert!(matches!(out.outcomes[0], IntentOutcome::Ok { .. }));
    Ok(())
}

#[tokio::test]
async fn plan_entry_and_approval() -> Result<()> {
    let env = env();
    let dt = d(2024, 3, 10);
    create_draft(&env, dt).await?;

    let affected = env
        .approval
        .approve(
            &ctx(),
            ApprovalScope {
                shop_id: 1,
                graph_type: GraphType::Plan,
                dt_from: dt,
                dt_to: dt,
                employee_ids: None,
            },
        )
        .await?;
    assert_eq!(affected, 1);

    let approved = env
        .store
        .fetch(&QuerySpec::range(dt, dt).graph(GraphType::Plan).approved(true))
        .await?;
    assert_eq!(approved.len(), 1);
    // 9h shift minus the 75 minutes of breaks the 540-minute rule grants
    assert_eq!(approved[0].work_hours, 7.75);
    assert!(approved[0].parent_worker_day.is_some());

    // approving the same scope again changes nothing
    let again = env
        .approval
        .approve(
            &ctx(),
            ApprovalScope {
                shop_id: 1,
                graph_type: GraphType::Plan,
                dt_from: dt,
                dt_to: dt,
                employee_ids: None,
            },
        )
        .await?;
    assert_eq!(again, 0);
    Ok(())
}

#[tokio::test]
async fn night_shift_belongs_to_its_start_date() -> Result<()> {
    let env = env_with(
        NetworkSettings::default(),
        vec![BreakRule { min_shift_minutes: 480, breaks_minutes: vec![60] }],
    );
    let dt = d(2024, 3, 10);
    let wd = WorkerDay::new(1, dt, "W", GraphType::Plan, WorkerDaySource::ManualFull).with_interval(
        1,
        dt.and_hms_opt(22, 0, 0).unwrap(),
        d(2024, 3, 11).and_hms_opt(6, 0, 0).unwrap(),
    );
    let written = env.store.apply(vec![WriteOp::Insert(wd)]).await?;
    assert_eq!(written[0].dt, dt);
    assert_eq!(written[0].work_hours, 7.0);
    Ok(())
}

#[tokio::test]
async fn ticks_become_a_paired_fact() -> Result<()> {
    let env = env();
    let dt = d(2024, 3, 10);

    let mut plan = WorkerDay::new(1, dt, "W", GraphType::Plan, WorkerDaySource::ManualFull)
        .with_interval(1, dt.and_hms_opt(9, 0, 0).unwrap(), dt.and_hms_opt(18, 0, 0).unwrap());
    plan.is_approved = true;
    let plan_id = env.store.apply(vec![WriteOp::Insert(plan)]).await?[0].id;

    env.reconciler
        .ingest(AttendanceRecord::tick(1, 1, AttendanceType::Coming, dt.and_hms_opt(9, 3, 0).unwrap()))
        .await?;
    env.reconciler
        .ingest(AttendanceRecord::tick(1, 1, AttendanceType::Leaving, dt.and_hms_opt(18, 7, 0).unwrap()))
        .await?;

    let facts = env
        .store
        .fetch(&QuerySpec::range(dt, dt).graph(GraphType::Fact).approved(true))
        .await?;
    assert_eq!(facts.len(), 1);
    let fact = &facts[0];
    assert_eq!(fact.dttm_work_start, dt.and_hms_opt(9, 3, 0));
    assert_eq!(fact.dttm_work_end, dt.and_hms_opt(18, 7, 0));
    assert_eq!(fact.closest_plan_approved, Some(plan_id));
    assert_eq!(fact.source, WorkerDaySource::AttendanceRecalc);
    assert!(fact.work_hours > 0.0);

    // replaying the same stream leaves the fact set untouched
    env.reconciler.recalc(1, dt, dt).await?;
    let replayed = env
        .store
        .fetch(&QuerySpec::range(dt, dt).graph(GraphType::Fact).approved(true))
        .await?;
    assert_eq!(replayed, facts);
    Ok(())
}

#[tokio::test]
async fn stray_ticks_are_quarantined_without_sinking_the_batch() -> Result<()> {
    let env = env();
    let dt = d(2024, 3, 10);
    let next = d(2024, 3, 11);

    let mut plan = WorkerDay::new(1, dt, "W", GraphType::Plan, WorkerDaySource::ManualFull)
        .with_interval(1, dt.and_hms_opt(9, 0, 0).unwrap(), dt.and_hms_opt(18, 0, 0).unwrap());
    plan.is_approved = true;
    env.store.apply(vec![WriteOp::Insert(plan)]).await?;

    let mut rx = env.bus.subscribe();

    // Evening ticks hours past the plan: the lone-plan match clamps the end
    // below the start, which the store rejects. That shift must go to
    // quarantine, not fail the run.
    env.reconciler
        .ingest(AttendanceRecord::tick(1, 1, AttendanceType::Coming, dt.and_hms_opt(20, 0, 0).unwrap()))
        .await?;
    env.reconciler
        .ingest(AttendanceRecord::tick(1, 1, AttendanceType::Leaving, dt.and_hms_opt(20, 30, 0).unwrap()))
        .await?;

    // a normal shift the day after still reconciles in the same window
    env.reconciler
        .ingest(AttendanceRecord::tick(1, 1, AttendanceType::Coming, next.and_hms_opt(9, 0, 0).unwrap()))
        .await?;
    env.reconciler
        .ingest(AttendanceRecord::tick(1, 1, AttendanceType::Leaving, next.and_hms_opt(17, 0, 0).unwrap()))
        .await?;

    let facts = env
        .store
        .fetch(&QuerySpec::range(dt, next).graph(GraphType::Fact).approved(true))
        .await?;
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].dt, next);

    let mut quarantined = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, CoreEvent::TickQuarantined { .. }) {
            quarantined += 1;
        }
    }
    assert!(quarantined > 0);
    Ok(())
}

#[tokio::test]
async fn arrivals_and_departures_clamp_to_the_allowance() -> Result<()> {
    let env = env();
    let dt = d(2024, 3, 10);

    let mut plan = WorkerDay::new(1, dt, "W", GraphType::Plan, WorkerDaySource::ManualFull)
        .with_interval(1, dt.and_hms_opt(9, 0, 0).unwrap(), dt.and_hms_opt(18, 0, 0).unwrap());
    plan.is_approved = true;
    let plan_id = env.store.apply(vec![WriteOp::Insert(plan)]).await?[0].id;

    // 90 minutes early and 90 minutes late, against a 1h allowance each way
    env.reconciler
        .ingest(AttendanceRecord::tick(1, 1, AttendanceType::Coming, dt.and_hms_opt(7, 30, 0).unwrap()))
        .await?;
    env.reconciler
        .ingest(AttendanceRecord::tick(1, 1, AttendanceType::Leaving, dt.and_hms_opt(19, 30, 0).unwrap()))
        .await?;

    let facts = env
        .store
        .fetch(&QuerySpec::range(dt, dt).graph(GraphType::Fact).approved(true))
        .await?;
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].closest_plan_approved, Some(plan_id));
    assert_eq!(facts[0].dttm_work_start, dt.and_hms_opt(8, 0, 0));
    assert_eq!(facts[0].dttm_work_end, dt.and_hms_opt(19, 0, 0));
    Ok(())
}

#[tokio::test]
async fn create_then_delete_restores_pre_state() -> Result<()> {
    let env = env();
    let dt = d(2024, 3, 10);
    create_draft(&env, dt).await?;

    let out = env
        .batch
        .mutate(
            &ctx(),
            BatchRequest {
                graph_type: GraphType::Plan,
                approved: false,
                partial: false,
                intents: vec![WorkerDayIntent { employee_id: 1, dt, payload: None }],
            },
        )
        .await?;
    assert!(out.applied);

    let visible = env.store.fetch(&QuerySpec::range(dt, dt)).await?;
    assert!(visible.is_empty());
    let tombstones = env.store.fetch(&QuerySpec::range(dt, dt).with_deleted()).await?;
    assert_eq!(tombstones.len(), 1);
    assert_eq!(tombstones[0].type_code, "D");
    Ok(())
}

#[tokio::test]
async fn manual_fact_approval_links_closest_plan() -> Result<()> {
    let env = env();
    let dt = d(2024, 3, 10);

    let mut plan = WorkerDay::new(1, dt, "W", GraphType::Plan, WorkerDaySource::ManualFull)
        .with_interval(1, dt.and_hms_opt(9, 0, 0).unwrap(), dt.and_hms_opt(18, 0, 0).unwrap());
    plan.is_approved = true;
    let plan_id = env.store.apply(vec![WriteOp::Insert(plan)]).await?[0].id;

    let fact_draft = WorkerDay::new(1, dt, "W", GraphType::Fact, WorkerDaySource::ManualFull)
        .with_interval(1, dt.and_hms_opt(8, 55, 0).unwrap(), dt.and_hms_opt(18, 10, 0).unwrap());
    env.store.apply(vec![WriteOp::Insert(fact_draft)]).await?;

    let affected = env
        .approval
        .approve(
            &ctx(),
            ApprovalScope {
                shop_id: 1,
                graph_type: GraphType::Fact,
                dt_from: dt,
                dt_to: dt,
                employee_ids: None,
            },
        )
        .await?;
    assert_eq!(affected, 1);

    let facts = env
        .store
        .fetch(&QuerySpec::range(dt, dt).graph(GraphType::Fact).approved(true))
        .await?;
    assert_eq!(facts[0].closest_plan_approved, Some(plan_id));
    Ok(())
}

#[tokio::test]
async fn approve_then_revert_restores_previous_approved_set() -> Result<()> {
    let env = env();
    let dt = d(2024, 3, 10);
    let scope = || ApprovalScope {
        shop_id: 1,
        graph_type: GraphType::Plan,
        dt_from: dt,
        dt_to: dt,
        employee_ids: None,
    };

    create_draft(&env, dt).await?;
    env.approval.approve(&ctx(), scope()).await?;

    // reshape the draft and approve again; the 9-18 record gets archived
    let draft = env
        .store
        .fetch(&QuerySpec::range(dt, dt).graph(GraphType::Plan).approved(false))
        .await?
        .remove(0);
    let mut edited = draft.clone();
    edited.dttm_work_end = dt.and_hms_opt(17, 0, 0);
    env.store.apply(vec![WriteOp::Update(edited)]).await?;
    env.approval.approve(&ctx(), scope()).await?;

    let before_revert = env
        .store
        .fetch(&QuerySpec::range(dt, dt).graph(GraphType::Plan).approved(true))
        .await?;
    assert_eq!(before_revert[0].dttm_work_end, dt.and_hms_opt(17, 0, 0));

    env.approval.revert(&ctx(), scope()).await?;
    let after_revert = env
        .store
        .fetch(&QuerySpec::range(dt, dt).graph(GraphType::Plan).approved(true))
        .await?;
    assert_eq!(after_revert.len(), 1);
    assert_eq!(after_revert[0].type_code, "W");
    assert_eq!(after_revert[0].dttm_work_end, dt.and_hms_opt(18, 0, 0));
    Ok(())
}

#[tokio::test]
async fn month_pipeline_through_projection() -> Result<()> {
    let env = env();
    let dt = d(2024, 3, 11);
    create_draft(&env, dt).await?;
    env.approval
        .approve(
            &ctx(),
            ApprovalScope {
                shop_id: 1,
                graph_type: GraphType::Plan,
                dt_from: dt,
                dt_to: dt,
                employee_ids: None,
            },
        )
        .await?;

    env.reconciler
        .ingest(AttendanceRecord::tick(1, 1, AttendanceType::Coming, dt.and_hms_opt(9, 0, 0).unwrap()))
        .await?;
    env.reconciler
        .ingest(AttendanceRecord::tick(1, 1, AttendanceType::Leaving, dt.and_hms_opt(18, 0, 0).unwrap()))
        .await?;

    let rows = env.projector.rebuild(1, 2024, 3).await?;
    let row = rows.iter().find(|r| r.dt == dt).unwrap();
    assert_eq!(row.fact_type.as_deref(), Some("W"));
    assert_eq!(row.fact_total_hours, 7.75);
    assert_eq!(row.main_total_hours, 7.75);
    assert_eq!(row.additional_hours, 0.0);
    Ok(())
}
