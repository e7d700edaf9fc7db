//! End-to-end reconciliation scenarios against the in-memory item service.

use std::time::Duration;

use itemsync_core::item::{MODEL_EXPRESSIONS_PART, NOTEBOOK_CONTENT_PART, REPORT_BINDING_PART};
use itemsync_core::prelude::*;
use itemsync_core::rewrite::ReportBindingFile;

const SOURCE: &str = "ws-source";
const TARGET: &str = "ws-target";

/// Source-side identifiers the desired payloads were authored against.
struct SourceIds {
    lakehouse: String,
    endpoint: StorageEndpoint,
}

async fn seed_source(service: &MemoryItemService) -> SourceIds {
    let lakehouse = service
        .seed_item(SOURCE, "Sales", ItemKind::Lakehouse, Vec::new())
        .unwrap();
    service
        .seed_item(SOURCE, "Sales Model", ItemKind::SemanticModel, Vec::new())
        .unwrap();
    let endpoint = service
        .resolve_storage_endpoint(SOURCE, &lakehouse.id)
        .await
        .unwrap();
    service.clear_calls().unwrap();
    SourceIds {
        lakehouse: lakehouse.id,
        endpoint,
    }
}

fn desired_set(source: &SourceIds) -> Vec<ItemDefinition> {
    let notebook = format!(
        "# META {{\n# META   \"default_lakehouse\": \"{}\",\n# META   \"default_lakehouse_workspace_id\": \"{SOURCE}\"\n# META }}\n\ndf = spark.read.table(\"sales\")\n",
        source.lakehouse
    );
    let expressions = format!(
        "expression DatabaseQuery =\n\t\tlet\n\t\t\tdatabase = Sql.Database(\"{}\", \"{}\")\n\t\tin\n\t\t\tdatabase\n",
        source.endpoint.connection_string, source.endpoint.endpoint_id
    );
    let binding =
        r#"{"version":"4.0","datasetReference":{"byPath":{"path":"../Sales Model.Model/"}}}"#;

    vec![
        ItemDefinition::new("Sales Report", ItemKind::Report)
            .with_part(DefinitionPart::from_text(REPORT_BINDING_PART, binding))
            .with_part(DefinitionPart::from_text("report.json", "{}")),
        ItemDefinition::new("Sales Model", ItemKind::SemanticModel)
            .with_part(DefinitionPart::from_text("definition.pbism", "{}"))
            .with_part(DefinitionPart::from_text(MODEL_EXPRESSIONS_PART, &expressions)),
        ItemDefinition::new("Load Sales", ItemKind::Notebook)
            .with_part(DefinitionPart::from_text(NOTEBOOK_CONTENT_PART, &notebook)),
        ItemDefinition::new("Sales", ItemKind::Lakehouse),
    ]
}

fn fast_options() -> SyncOptions {
    SyncOptions {
        connection_settle_delay: Duration::ZERO,
        ..SyncOptions::default()
    }
}

fn find(service: &MemoryItemService, name: &str, kind: ItemKind) -> WorkspaceItem {
    service
        .items(TARGET)
        .unwrap()
        .into_iter()
        .find(|i| i.display_name == name && i.kind == kind)
        .unwrap_or_else(|| panic!("{name}.{kind} not found in target"))
}

fn part_text(service: &MemoryItemService, item: &WorkspaceItem, path: &str) -> String {
    service
        .definition(TARGET, &item.id)
        .unwrap()
        .unwrap()
        .into_iter()
        .find(|p| p.path == path)
        .unwrap()
        .decode_text()
        .unwrap()
}

fn position(calls: &[ServiceCall], pred: impl Fn(&ServiceCall) -> bool) -> usize {
    calls.iter().position(pred).expect("call not recorded")
}

fn created(name: &'static str) -> impl Fn(&ServiceCall) -> bool {
    move |c: &ServiceCall| matches!(c, ServiceCall::CreateItem { display_name, .. } if display_name == name)
}

#[tokio::test(start_paused = true)]
async fn sales_scenario_into_empty_workspace() {
    let service = MemoryItemService::new();
    let source = seed_source(&service).await;
    let engine = SyncEngine::new(service.clone());

    let report = engine
        .sync(desired_set(&source), &SyncTarget::new(TARGET).with_source(SOURCE))
        .await
        .unwrap();

    let lakehouse = find(&service, "Sales", ItemKind::Lakehouse);
    let endpoint = service.resolve_storage_endpoint(TARGET, &lakehouse.id).await.unwrap();
    let model = find(&service, "Sales Model", ItemKind::SemanticModel);
    let report_item = find(&service, "Sales Report", ItemKind::Report);

    // Storage first, then the model with its connection, then the report.
    let calls = service.calls().unwrap();
    let lakehouse_at = position(&calls, created("Sales"));
    let model_at = position(&calls, created("Sales Model"));
    let bind_at = position(&calls, |c| matches!(c, ServiceCall::BindItemToConnection { .. }));
    let refresh_at = position(&calls, |c| matches!(c, ServiceCall::RefreshItem { .. }));
    let report_at = position(&calls, created("Sales Report"));
    assert!(lakehouse_at < model_at);
    assert!(model_at < bind_at && bind_at < refresh_at);
    assert!(refresh_at < report_at);

    let notebook = find(&service, "Load Sales", ItemKind::Notebook);
    let code = part_text(&service, &notebook, NOTEBOOK_CONTENT_PART);
    assert!(code.contains(&lakehouse.id));
    assert!(code.contains(TARGET));
    assert!(!code.contains(&source.lakehouse));
    assert!(!code.contains(SOURCE));
    assert!(calls.iter().any(
        |c| matches!(c, ServiceCall::RunItem { item_id, .. } if *item_id == notebook.id)
    ));

    let expressions = part_text(&service, &model, MODEL_EXPRESSIONS_PART);
    assert!(expressions.contains(&endpoint.connection_string));
    assert!(expressions.contains(&endpoint.endpoint_id));
    assert!(!expressions.contains(&source.endpoint.endpoint_id));

    let connections = service.connections().unwrap();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].1.server, endpoint.connection_string);
    assert_eq!(connections[0].1.database, endpoint.endpoint_id);
    assert_eq!(
        service.binding(TARGET, &model.id).unwrap().as_deref(),
        Some(connections[0].0.as_str())
    );

    let binding: ReportBindingFile =
        serde_json::from_str(&part_text(&service, &report_item, REPORT_BINDING_PART)).unwrap();
    let by_connection = binding.dataset_reference.by_connection.unwrap();
    assert_eq!(by_connection.pbi_model_database_name.as_deref(), Some(model.id.as_str()));

    assert_eq!(report.count(SyncAction::Created), 4);
    assert!(report.failures().is_empty());
    // workspace + lakehouse + endpoint pair + model
    assert_eq!(report.redirections, 5);
}

#[tokio::test]
async fn second_run_is_structural_noop() {
    let service = MemoryItemService::new();
    let source = seed_source(&service).await;
    let engine = SyncEngine::new(service.clone()).with_options(fast_options());
    let target = SyncTarget::new(TARGET).with_source(SOURCE);

    engine.sync(desired_set(&source), &target).await.unwrap();
    let items_after_first = service.items(TARGET).unwrap();
    service.clear_calls().unwrap();

    let second = engine.sync(desired_set(&source), &target).await.unwrap();

    assert!(second.is_structural_noop());
    assert_eq!(second.count(SyncAction::Updated), 3);
    assert_eq!(second.count(SyncAction::Unchanged), 1);
    assert_eq!(service.items(TARGET).unwrap(), items_after_first);

    let calls = service.calls().unwrap();
    assert!(!calls.iter().any(|c| matches!(
        c,
        ServiceCall::CreateItem { .. }
            | ServiceCall::DeleteItem { .. }
            | ServiceCall::RunItem { .. }
            | ServiceCall::CreateConnection { .. }
    )));
}

#[tokio::test]
async fn update_policy_flags_repeat_creation_steps() {
    let service = MemoryItemService::new();
    let source = seed_source(&service).await;
    let target = SyncTarget::new(TARGET).with_source(SOURCE);

    SyncEngine::new(service.clone())
        .with_options(fast_options())
        .sync(desired_set(&source), &target)
        .await
        .unwrap();
    service.clear_calls().unwrap();

    let options = SyncOptions {
        run_notebooks_on_update: true,
        rebind_models_on_update: true,
        ..fast_options()
    };
    SyncEngine::new(service.clone())
        .with_options(options)
        .sync(desired_set(&source), &target)
        .await
        .unwrap();

    let calls = service.calls().unwrap();
    assert!(calls.iter().any(|c| matches!(c, ServiceCall::RunItem { .. })));
    assert!(calls.iter().any(|c| matches!(c, ServiceCall::CreateConnection { .. })));
    assert!(calls.iter().any(|c| matches!(c, ServiceCall::RefreshItem { .. })));
    assert_eq!(service.connections().unwrap().len(), 2);
}

#[tokio::test]
async fn orphans_are_deleted_and_derived_items_kept() {
    let service = MemoryItemService::new();
    service
        .seed_item(TARGET, "Sales", ItemKind::Lakehouse, Vec::new())
        .unwrap();
    let legacy = service
        .seed_item(TARGET, "Legacy Report", ItemKind::Report, Vec::new())
        .unwrap();
    service
        .seed_item(TARGET, "Old Pipeline", ItemKind::Other("DataPipeline".into()), Vec::new())
        .unwrap();

    let desired = vec![ItemDefinition::new("Sales", ItemKind::Lakehouse)];
    let report = SyncEngine::new(service.clone())
        .with_options(fast_options())
        .sync(desired, &SyncTarget::new(TARGET))
        .await
        .unwrap();

    assert_eq!(report.count(SyncAction::Deleted), 2);
    let remaining: Vec<_> = service
        .items(TARGET)
        .unwrap()
        .into_iter()
        .map(|i| i.identity().to_string())
        .collect();
    assert_eq!(
        remaining,
        ["Sales.Lakehouse", "Sales.SQLEndpoint", "Sales.SemanticModel"]
    );
    assert!(!remaining.contains(&format!("{}.Report", legacy.display_name)));
}

#[tokio::test]
async fn failed_orphan_delete_does_not_abort_run() {
    let service = MemoryItemService::new();
    let legacy = service
        .seed_item(TARGET, "Legacy Report", ItemKind::Report, Vec::new())
        .unwrap();
    let old = service
        .seed_item(TARGET, "Old Notebook", ItemKind::Notebook, Vec::new())
        .unwrap();
    service.fail_delete(&legacy.id).unwrap();

    let desired = vec![ItemDefinition::new("Sales", ItemKind::Lakehouse)];
    let report = SyncEngine::new(service.clone())
        .with_options(fast_options())
        .sync(desired, &SyncTarget::new(TARGET))
        .await
        .unwrap();

    let failures = report.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].item_id.as_deref(), Some(legacy.id.as_str()));
    assert!(failures[0].detail.as_deref().unwrap().contains("locked"));

    let ids: Vec<_> = service.items(TARGET).unwrap().into_iter().map(|i| i.id).collect();
    assert!(ids.contains(&legacy.id));
    assert!(!ids.contains(&old.id));
}

#[tokio::test]
async fn keep_orphans_skips_deletion() {
    let service = MemoryItemService::new();
    service
        .seed_item(TARGET, "Legacy Report", ItemKind::Report, Vec::new())
        .unwrap();

    let options = SyncOptions {
        delete_orphans: false,
        ..fast_options()
    };
    let report = SyncEngine::new(service.clone())
        .with_options(options)
        .sync(vec![ItemDefinition::new("Sales", ItemKind::Lakehouse)], &SyncTarget::new(TARGET))
        .await
        .unwrap();

    assert_eq!(report.count(SyncAction::Deleted), 0);
    assert!(
        !service
            .calls()
            .unwrap()
            .iter()
            .any(|c| matches!(c, ServiceCall::DeleteItem { .. }))
    );
}

#[tokio::test]
async fn implicit_model_in_desired_set_is_skipped() {
    let service = MemoryItemService::new();
    let desired = vec![
        ItemDefinition::new("Sales", ItemKind::Lakehouse),
        ItemDefinition::new("Sales", ItemKind::SemanticModel)
            .with_part(DefinitionPart::from_text(MODEL_EXPRESSIONS_PART, "x")),
    ];

    let report = SyncEngine::new(service.clone())
        .with_options(fast_options())
        .sync(desired, &SyncTarget::new(TARGET))
        .await
        .unwrap();

    let outcome = report
        .outcome(&ItemIdentity::new("Sales", ItemKind::SemanticModel))
        .unwrap();
    assert_eq!(outcome.action, SyncAction::Skipped);
    let model_creates = service
        .calls()
        .unwrap()
        .into_iter()
        .filter(|c| matches!(c, ServiceCall::CreateItem { kind: ItemKind::SemanticModel, .. }))
        .count();
    assert_eq!(model_creates, 0);
}

#[tokio::test]
async fn explicit_model_named_after_target_only_lakehouse_is_created() {
    let service = MemoryItemService::new();
    let old = service
        .seed_item(TARGET, "Old", ItemKind::Lakehouse, Vec::new())
        .unwrap();
    let desired = vec![
        ItemDefinition::new("Old", ItemKind::SemanticModel)
            .with_part(DefinitionPart::from_text(MODEL_EXPRESSIONS_PART, "x")),
    ];

    let engine = SyncEngine::new(service.clone()).with_options(fast_options());
    let plan = engine.plan(&desired, TARGET).await.unwrap();
    assert_eq!(plan.creates, [ItemIdentity::new("Old", ItemKind::SemanticModel)]);

    let report = engine.sync(desired, &SyncTarget::new(TARGET)).await.unwrap();

    let model = report
        .outcome(&ItemIdentity::new("Old", ItemKind::SemanticModel))
        .unwrap();
    assert_eq!(model.action, SyncAction::Created);
    let created = find(&service, "Old", ItemKind::SemanticModel);
    assert_eq!(part_text(&service, &created, MODEL_EXPRESSIONS_PART), "x");

    let lakehouse = report
        .outcome(&ItemIdentity::new("Old", ItemKind::Lakehouse))
        .unwrap();
    assert_eq!(lakehouse.action, SyncAction::Deleted);
    assert_eq!(lakehouse.item_id.as_deref(), Some(old.id.as_str()));
}

#[tokio::test]
async fn missing_report_model_aborts_after_partial_progress() {
    let service = MemoryItemService::new();
    let desired = vec![
        ItemDefinition::new("Sales", ItemKind::Lakehouse),
        ItemDefinition::new("Orphaned Report", ItemKind::Report).with_part(DefinitionPart::from_text(
            REPORT_BINDING_PART,
            r#"{"version":"4.0","datasetReference":{"byPath":{"path":"../Nowhere.SemanticModel"}}}"#,
        )),
    ];

    let err = SyncEngine::new(service.clone())
        .with_options(fast_options())
        .sync(desired, &SyncTarget::new(TARGET))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::BindingTargetNotFound { .. }));
    // The storage pass already committed its work.
    find(&service, "Sales", ItemKind::Lakehouse);
}

#[tokio::test]
async fn models_are_not_bound_when_connections_disabled() {
    let service = MemoryItemService::new();
    let source = seed_source(&service).await;
    let options = SyncOptions {
        create_connections: false,
        ..fast_options()
    };

    SyncEngine::new(service.clone())
        .with_options(options)
        .sync(desired_set(&source), &SyncTarget::new(TARGET).with_source(SOURCE))
        .await
        .unwrap();

    let model = find(&service, "Sales Model", ItemKind::SemanticModel);
    assert!(service.binding(TARGET, &model.id).unwrap().is_none());
    assert!(service.connections().unwrap().is_empty());
}

#[tokio::test]
async fn without_source_workspace_nothing_is_redirected() {
    let service = MemoryItemService::new();
    let source = seed_source(&service).await;

    let report = SyncEngine::new(service.clone())
        .with_options(fast_options())
        .sync(desired_set(&source), &SyncTarget::new(TARGET))
        .await
        .unwrap();

    assert_eq!(report.redirections, 0);
    let notebook = find(&service, "Load Sales", ItemKind::Notebook);
    assert!(part_text(&service, &notebook, NOTEBOOK_CONTENT_PART).contains(&source.lakehouse));
}

#[tokio::test]
async fn plan_matches_first_run() {
    let service = MemoryItemService::new();
    let source = seed_source(&service).await;
    service
        .seed_item(TARGET, "Legacy Report", ItemKind::Report, Vec::new())
        .unwrap();
    let engine = SyncEngine::new(service.clone()).with_options(fast_options());

    let plan = engine.plan(&desired_set(&source), TARGET).await.unwrap();
    assert_eq!(plan.creates.len(), 4);
    assert_eq!(plan.deletes, [ItemIdentity::new("Legacy Report", ItemKind::Report)]);

    let report = engine
        .sync(desired_set(&source), &SyncTarget::new(TARGET).with_source(SOURCE))
        .await
        .unwrap();
    assert_eq!(report.count(SyncAction::Created), plan.creates.len());
    assert_eq!(report.count(SyncAction::Deleted), plan.deletes.len());
}
