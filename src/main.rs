use std::{path::Path, process, sync::Arc};

use folio::{
    application::{
        bulk::{BulkCoordinator, BulkOutcome},
        deploy::{DeployConfig, DeployTrigger},
        error::AppError,
        mutation::MutationLayer,
        preferences::toggle_love,
        projects::ProjectService,
        repos::{ConnectionStatus, ContentRepo, DeployHook},
        retry::RetryPolicy,
        sync::{DeployReport, DocumentWrite, SyncCoordinator},
        writer::OptimisticWriter,
    },
    cache::{CacheConfig, DocumentCache},
    config::{self, Backend, BulkActionArg, Command, ProjectsCommand, Settings, StatusArg},
    domain::{
        document::{ContentKey, Replace},
        projects::{BulkAction, NewProject},
    },
    infra::{
        deploy_hook::HttpDeployHook, error::InfraError, github::GitHubContentRepo,
        local::LocalContentRepo, memory::MemoryContentRepo, preferences::FilePreferenceStore,
        telemetry,
    },
};
use folio_types::ProjectStatus;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let report = error.report();
    if dispatcher::has_been_set() {
        error!(error = %report.summary(), "application error");
    } else {
        let subscriber = tracing_fmt()
            .with_writer(std::io::stderr)
            .with_max_level(Level::ERROR)
            .finish();
        let dispatch = Dispatch::new(subscriber);
        dispatcher::with_default(&dispatch, || {
            error!(error = %report.summary(), "application error");
        });
    }
    eprintln!("{}", error.presentation_message());
}

/// Services shared by every command.
struct AppContext {
    repo: Arc<dyn ContentRepo>,
    cache: Arc<DocumentCache>,
    mutations: Arc<MutationLayer>,
    deploy: Arc<DeployTrigger>,
    sync: SyncCoordinator,
    projects: ProjectService,
    preferences: FilePreferenceStore,
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;
    let app = build_application_context(&settings)?;

    match cli_args.command {
        Command::Get(args) => run_get(&app, &args.key).await,
        Command::Write(args) => run_write(&app, args).await,
        Command::Projects(command) => run_projects(&app, command).await,
        Command::Deploy(args) => run_deploy(&app, args.retry).await,
        Command::Check => run_check(&app).await,
        Command::Like(args) => {
            let state = toggle_love(&app.preferences, &args.project_id, args.initial).await?;
            print_json(&state)
        }
    }
}

fn build_application_context(settings: &Settings) -> Result<AppContext, AppError> {
    let repo: Arc<dyn ContentRepo> = match settings.content.backend {
        Backend::GitHub => Arc::new(GitHubContentRepo::new(settings.content.host.clone())?),
        Backend::Local => Arc::new(LocalContentRepo::new(&settings.content.local_root)),
        Backend::Memory => Arc::new(MemoryContentRepo::new()),
    };
    let hook: Arc<dyn DeployHook> = Arc::new(HttpDeployHook::new(&settings.deploy)?);

    let cache = Arc::new(DocumentCache::new(
        Arc::clone(&repo),
        CacheConfig::from(&settings.cache),
    ));
    let writer = OptimisticWriter::new(Arc::clone(&repo), RetryPolicy::from(&settings.retry));
    let mutations = Arc::new(MutationLayer::new(Arc::clone(&cache), writer.clone()));
    let bulk = Arc::new(BulkCoordinator::new(Arc::clone(&cache), writer));
    let deploy = Arc::new(DeployTrigger::new(hook, DeployConfig::from(&settings.deploy)));

    info!(
        backend = ?settings.content.backend,
        retry_attempts = settings.retry.max_attempts.get(),
        "Content store initialised"
    );

    Ok(AppContext {
        sync: SyncCoordinator::new(Arc::clone(&mutations), Arc::clone(&deploy)),
        projects: ProjectService::new(Arc::clone(&cache), Arc::clone(&mutations), bulk),
        preferences: FilePreferenceStore::new(&settings.preferences.path),
        repo,
        cache,
        mutations,
        deploy,
    })
}

async fn run_get(app: &AppContext, key: &str) -> Result<(), AppError> {
    let key = ContentKey::new(key)?;
    let entry = app.cache.entry(&key).await?;
    match entry {
        Some(entry) => print_json(&json!({
            "key": entry.key.as_str(),
            "token": entry.token.as_ref().map(|token| token.as_str()),
            "value": entry.value,
        })),
        None => Err(AppError::validation(format!("document `{key}` does not exist"))),
    }
}

async fn run_write(app: &AppContext, args: config::WriteArgs) -> Result<(), AppError> {
    let key = ContentKey::new(args.key.as_str())?;
    let payload = read_json_file(&args.file).await?;
    let description = args.message.unwrap_or_else(|| format!("Update {key}"));

    if !args.deploy {
        let outcome = app
            .mutations
            .mutate(&key, Replace(payload), description)
            .await?;
        return print_json(&json!({
            "key": outcome.key.as_str(),
            "token": outcome.token.as_str(),
            "attempts": outcome.attempts,
        }));
    }

    let report = app
        .sync
        .publish(vec![DocumentWrite::replace(key, payload, description)])
        .await
        .into_result()?;
    let deployed = match &report.deploy {
        DeployReport::Triggered(outcome) => format!("{outcome:?}"),
        DeployReport::NotAttempted => "not attempted".to_string(),
        DeployReport::Failed(err) => format!("failed: {err}"),
    };
    let documents: Vec<Value> = report
        .documents
        .iter()
        .map(|doc| match &doc.result {
            Ok(outcome) => json!({
                "key": doc.key.as_str(),
                "token": outcome.token.as_str(),
                "attempts": outcome.attempts,
            }),
            Err(err) => json!({ "key": doc.key.as_str(), "error": err.to_string() }),
        })
        .collect();
    print_json(&json!({ "documents": documents, "deploy": deployed }))
}

async fn run_projects(app: &AppContext, command: ProjectsCommand) -> Result<(), AppError> {
    match command {
        ProjectsCommand::List { status } => {
            let projects = app.projects.list(status.map(project_status)).await?;
            print_json(&projects)
        }
        ProjectsCommand::Create(args) => {
            let project = app
                .projects
                .create(NewProject {
                    title: args.title,
                    year: args.year,
                    status: args.status.map(project_status),
                    fields: parse_assignments(&args.set)?,
                })
                .await?;
            print_json(&project)
        }
        ProjectsCommand::Update { id, set } => {
            let project = app.projects.update(&id, parse_assignments(&set)?).await?;
            print_json(&project)
        }
        ProjectsCommand::Delete { id } => {
            app.projects.delete(&id).await?;
            print_json(&json!({ "deleted": id }))
        }
        ProjectsCommand::Status { id, status } => {
            let project = app.projects.set_status(&id, project_status(status)).await?;
            print_json(&project)
        }
        ProjectsCommand::Bulk { action, ids } => {
            let outcome = app.projects.bulk(bulk_action(action), &ids).await?;
            print_json(&bulk_summary(&outcome))
        }
        ProjectsCommand::Feature { ids } => {
            let gallery = app.projects.set_featured(ids).await?;
            print_json(&gallery)
        }
    }
}

async fn run_deploy(app: &AppContext, retry: bool) -> Result<(), AppError> {
    let outcome = if retry {
        // A fresh process starts idle, so push once and retry a failure.
        match app.deploy.trigger_deploy().await {
            Ok(outcome) => outcome,
            Err(_) => app.deploy.retry_deploy().await?,
        }
    } else {
        app.deploy.trigger_deploy().await?
    };
    let status = app.deploy.status();
    print_json(&json!({
        "outcome": format!("{outcome:?}"),
        "state": status.state.as_str(),
    }))
}

async fn run_check(app: &AppContext) -> Result<(), AppError> {
    let status = app.repo.verify().await;
    let label = match &status {
        ConnectionStatus::Connected => "connected".to_string(),
        ConnectionStatus::RepoNotFound => "repository not found".to_string(),
        ConnectionStatus::InvalidToken => "invalid token".to_string(),
        ConnectionStatus::Unreachable(reason) => format!("unreachable: {reason}"),
    };
    print_json(&json!({ "connected": status.is_connected(), "status": label }))?;
    if status.is_connected() {
        Ok(())
    } else {
        Err(AppError::validation(label))
    }
}

fn project_status(status: StatusArg) -> ProjectStatus {
    match status {
        StatusArg::Published => ProjectStatus::Published,
        StatusArg::Draft => ProjectStatus::Draft,
    }
}

fn bulk_action(action: BulkActionArg) -> BulkAction {
    match action {
        BulkActionArg::Publish => BulkAction::Publish,
        BulkActionArg::Draft => BulkAction::Draft,
        BulkActionArg::Delete => BulkAction::Delete,
    }
}

fn bulk_summary(outcome: &BulkOutcome) -> Value {
    match outcome {
        BulkOutcome::Unchanged { missing } => json!({ "changed": 0, "missing": missing }),
        BulkOutcome::Applied {
            token,
            modified,
            removed,
            missing,
            attempts,
        } => json!({
            "changed": modified.len() + removed.len(),
            "modified": modified,
            "removed": removed,
            "missing": missing,
            "token": token.as_str(),
            "attempts": attempts,
        }),
    }
}

/// `field=value` pairs; the value is JSON when it parses, a string otherwise.
fn parse_assignments(pairs: &[String]) -> Result<Map<String, Value>, AppError> {
    let mut fields = Map::new();
    for pair in pairs {
        let (field, raw) = pair
            .split_once('=')
            .ok_or_else(|| AppError::validation(format!("expected FIELD=VALUE, got `{pair}`")))?;
        let field = field.trim();
        if field.is_empty() {
            return Err(AppError::validation(format!("missing field name in `{pair}`")));
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        fields.insert(field.to_string(), value);
    }
    Ok(fields)
}

async fn read_json_file(path: &Path) -> Result<Value, AppError> {
    let bytes = tokio::fs::read(path).await.map_err(InfraError::from)?;
    serde_json::from_slice(&bytes).map_err(|err| {
        AppError::validation(format!("{} is not valid JSON: {err}", path.display()))
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{out}");
    Ok(())
}
