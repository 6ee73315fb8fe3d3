use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};

use crate::cli::{LoginArgs, ServeArgs, ServiceArgs};
use crate::crm::auth::CrmLogin;
use crate::crm::mailbox::{ImapMailbox, PollPolicy};
use crate::crm::writer::GraphqlWriter;
use crate::error::Result;
use crate::extract::llm::OpenAiExtractor;
use crate::extract::pdf::PdfTextExtractor;
use crate::extract::professions::ProfessionTable;
use crate::pipeline::{PdfData, UserDetails, Workflow};
use crate::portal::api::PortalClient;
use crate::portal::browser::BrowserLogin;
use crate::portal::roster::NamedRosterEntry;

#[derive(Clone)]
struct AppState {
    workflow: Workflow,
}

/// Wire the production collaborators from configuration.
fn build_workflow(opts: &ServiceArgs) -> anyhow::Result<Workflow> {
    let client = Client::builder()
        .user_agent("provider-intake/0.1")
        .build()
        .context("Failed creating HTTP client")?;

    let professions = Arc::new(
        ProfessionTable::load(&opts.professions_file).context("load profession table")?,
    );
    let mailbox = Arc::new(ImapMailbox::new(&opts.mailbox, &opts.crm.email));

    Ok(Workflow::new(
        Arc::new(BrowserLogin::new(&opts.portal)),
        Arc::new(CrmLogin::new(
            client.clone(),
            &opts.crm,
            mailbox,
            PollPolicy::from_args(&opts.mailbox),
        )),
        Arc::new(PortalClient::new(client.clone(), &opts.portal)),
        Arc::new(PdfTextExtractor),
        Arc::new(OpenAiExtractor::new(client.clone(), &opts.llm, professions)),
        Arc::new(GraphqlWriter::new(client, &opts.crm.api_base)),
    ))
}

fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/get-roasters", get(get_roasters))
        .route("/get-token", get(get_token))
        .route("/get-pdf-data", post(get_pdf_data))
        .route("/create-licence-entry", post(create_licence_entry))
        .layer(cors)
        .with_state(state)
}

pub async fn run(opts: ServeArgs) -> anyhow::Result<()> {
    let state = AppState {
        workflow: build_workflow(&opts.services)?,
    };
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", opts.host, opts.port)
        .parse()
        .context("parse host:port")?;

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// One-shot login against both systems, printing the tokens for reuse in requests.
pub async fn login(opts: LoginArgs) -> anyhow::Result<()> {
    let workflow = build_workflow(&opts.services)?;
    let (pdc_token, crm_token) = workflow.tokens().await?;
    let out = TokenResponse {
        pdc_token,
        crm_token,
    };
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

#[derive(Debug, Serialize)]
struct Welcome {
    message: &'static str,
}

async fn root() -> impl IntoResponse {
    Json(Welcome { message: "Welcome" })
}

#[derive(Debug, Deserialize)]
struct RosterParams {
    token: Option<String>,
}

async fn get_roasters(
    State(st): State<AppState>,
    Query(p): Query<RosterParams>,
) -> Result<Json<Vec<NamedRosterEntry>>> {
    let token = p.token.filter(|t| !t.is_empty());
    Ok(Json(st.workflow.roster(token).await?))
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    #[serde(rename = "pdcToken")]
    pdc_token: String,
    #[serde(rename = "crmToken")]
    crm_token: String,
}

async fn get_token(State(st): State<AppState>) -> Result<Json<TokenResponse>> {
    let (pdc_token, crm_token) = st.workflow.tokens().await?;
    Ok(Json(TokenResponse {
        pdc_token,
        crm_token,
    }))
}

async fn get_pdf_data(
    State(st): State<AppState>,
    Json(details): Json<UserDetails>,
) -> Result<Json<PdfData>> {
    Ok(Json(st.workflow.pdf_data(&details).await?))
}

async fn create_licence_entry(
    State(st): State<AppState>,
    Json(details): Json<UserDetails>,
) -> impl IntoResponse {
    tracing::info!("Onboarding requested for {}", details.username);
    let events = ReceiverStream::new(st.workflow.start(details))
        .map(|event| Event::default().json_data(event));
    (
        [(header::CACHE_CONTROL, "no-cache")],
        Sse::new(events).keep_alive(KeepAlive::default()),
    )
}
