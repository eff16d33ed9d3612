// src/api.rs
// REST surface: background analysis jobs, job polling and persona comparison.

use actix_web::{http::StatusCode, web, HttpResponse, ResponseError};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::batch_inference::BatchOrchestrator;
use crate::comparator::{compare, DEFAULT_SIMILARITY_THRESHOLD};
use crate::config::PipelineSettings;
use crate::persona::PersonaRecord;
use crate::persona_extractor::PersonaExtractor;
use crate::pipeline::{analyze_transcript, VideoAnalysis};
use crate::transcript::{self, ChatMessage};

/// Share of the progress bar covered by batch extraction; aggregation finishes the rest.
const EXTRACTION_PROGRESS: f32 = 0.9;

// Shared state for the server
pub struct AppState {
    pub extractor: Arc<PersonaExtractor>,
    pub settings: PipelineSettings,
    pub jobs: Arc<DashMap<String, JobStatus>>, // In-memory job store
}

impl AppState {
    pub fn new(extractor: Arc<PersonaExtractor>, settings: PipelineSettings) -> Self {
        Self {
            extractor,
            settings,
            jobs: Arc::new(DashMap::new()),
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/analyze", web::post().to(start_analysis))
        .route("/api/status/{id}", web::get().to(get_job_status))
        .route("/api/compare", web::post().to(compare_personas));
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::JobNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let error_type = match self {
            ApiError::JobNotFound(_) => "job_not_found",
            ApiError::BadRequest(_) => "bad_request",
        };

        tracing::warn!(error_type = error_type, status = status.as_u16(), message = %self, "API error");

        HttpResponse::build(status).json(ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
        })
    }
}

/// A chat line as posted by clients: a bare string or a full transcript row.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IncomingMessage {
    Text(String),
    Row(ChatMessage),
}

impl From<IncomingMessage> for ChatMessage {
    fn from(message: IncomingMessage) -> Self {
        match message {
            IncomingMessage::Text(text) => ChatMessage::new(&text),
            IncomingMessage::Row(row) => row,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub video_id: Option<String>,
    pub messages: Vec<IncomingMessage>,
    pub persona_count: Option<usize>,
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub filter_bots: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobCreatedResponse {
    pub job_id: String,
    pub status: JobState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    /// Nothing left to analyze after filtering.
    NoData,
    AnalysisFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: String,
    pub video_id: String,
    pub status: JobState,
    pub progress: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<VideoAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

impl JobStatus {
    fn processing(id: &str, video_id: &str) -> Self {
        Self {
            id: id.to_string(),
            video_id: video_id.to_string(),
            status: JobState::Processing,
            progress: 0.0,
            analysis: None,
            error: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CompareRequest {
    pub personas_a: Vec<PersonaRecord>,
    pub personas_b: Vec<PersonaRecord>,
    pub threshold: Option<f64>,
}

// POST /api/analyze
pub async fn start_analysis(
    data: web::Data<AppState>,
    req: web::Json<AnalyzeRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = req.into_inner();

    let mut settings = data.settings.clone();
    if let Some(count) = req.persona_count {
        settings.max_personas = count;
    }
    if let Some(size) = req.batch_size {
        settings.batch_size = size;
    }
    settings
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let job_id = Uuid::new_v4().to_string();
    let video_id = req.video_id.clone().unwrap_or_else(|| job_id.clone());
    let mut messages: Vec<ChatMessage> = req
        .messages
        .into_iter()
        .map(ChatMessage::from)
        .filter(|m| !m.text.trim().is_empty())
        .collect();
    if req.filter_bots {
        messages = transcript::filter_bots(messages);
    }

    data.jobs
        .insert(job_id.clone(), JobStatus::processing(&job_id, &video_id));
    tracing::info!(job_id = %job_id, video_id = %video_id, messages = messages.len(), "Analysis job queued");

    let jobs = data.jobs.clone();
    let extractor = data.extractor.clone();
    let job = job_id.clone();
    tokio::task::spawn_blocking(move || {
        run_job(&jobs, &job, &video_id, &messages, &settings, extractor);
    });

    Ok(HttpResponse::Accepted().json(JobCreatedResponse {
        job_id,
        status: JobState::Processing,
    }))
}

fn run_job(
    jobs: &Arc<DashMap<String, JobStatus>>,
    job_id: &str,
    video_id: &str,
    messages: &[ChatMessage],
    settings: &PipelineSettings,
    extractor: Arc<PersonaExtractor>,
) {
    if messages.is_empty() {
        tracing::warn!(job_id = %job_id, "No chat messages to analyze");
        fail_job(jobs, job_id, JobErrorKind::NoData, "no chat messages to analyze".to_string());
        return;
    }

    let progress_jobs = jobs.clone();
    let progress_id = job_id.to_string();
    let orchestrator = BatchOrchestrator::new(extractor, settings).with_progress(Arc::new(
        move |done: usize, total: usize| {
            if let Some(mut job) = progress_jobs.get_mut(&progress_id) {
                job.progress = EXTRACTION_PROGRESS * done as f32 / total as f32;
            }
        },
    ));

    match analyze_transcript(video_id, messages, settings, &orchestrator) {
        Ok(analysis) => {
            if let Some(mut job) = jobs.get_mut(job_id) {
                job.analysis = Some(analysis);
                job.status = JobState::Completed;
                job.progress = 1.0;
            }
            tracing::info!(job_id = %job_id, "Analysis job finished");
        }
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Analysis job failed");
            fail_job(jobs, job_id, JobErrorKind::AnalysisFailed, e.to_string());
        }
    }
}

fn fail_job(jobs: &DashMap<String, JobStatus>, job_id: &str, kind: JobErrorKind, message: String) {
    if let Some(mut job) = jobs.get_mut(job_id) {
        job.status = JobState::Failed;
        job.progress = 1.0;
        job.error = Some(JobError { kind, message });
    }
}

// GET /api/status/{job_id}
pub async fn get_job_status(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let job_id = path.into_inner();
    let job = data
        .jobs
        .get(&job_id)
        .map(|job| job.clone())
        .ok_or(ApiError::JobNotFound(job_id))?;
    Ok(HttpResponse::Ok().json(job))
}

// POST /api/compare
pub async fn compare_personas(req: web::Json<CompareRequest>) -> Result<HttpResponse, ApiError> {
    let mut req = req.into_inner();
    let threshold = req.threshold.unwrap_or(DEFAULT_SIMILARITY_THRESHOLD);
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ApiError::BadRequest(format!(
            "threshold must be between 0 and 1, got {}",
            threshold
        )));
    }

    req.personas_a
        .iter_mut()
        .chain(req.personas_b.iter_mut())
        .for_each(PersonaRecord::enforce_caps);

    let result = compare(&req.personas_a, &req.personas_b, threshold);
    Ok(HttpResponse::Ok().json(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::ComparisonResult;
    use crate::error::GatewayError;
    use crate::gateway::testing::ScriptedGateway;
    use crate::persona_extractor::ExtractorSettings;
    use actix_web::{test, App};
    use std::time::Duration;

    const REPLY: &str = r#"{"personas": [
        {"name": "Hype Booster", "share": "60%", "sentiment_label": "Positive", "sentiment_percent": "85%"},
        {"name": "Lurker", "share": 40}
    ]}"#;

    fn state(reply: Result<String, GatewayError>) -> web::Data<AppState> {
        let gateway = Arc::new(ScriptedGateway::always(reply));
        let extractor = Arc::new(PersonaExtractor::new(gateway, ExtractorSettings::default()));
        let settings = PipelineSettings {
            max_concurrency: 1,
            batch_retries: 0,
            retry_backoff_ms: 0,
            ..PipelineSettings::default()
        };
        web::Data::new(AppState::new(extractor, settings))
    }

    async fn wait_for_job(state: &web::Data<AppState>, job_id: &str) -> JobStatus {
        for _ in 0..200 {
            if let Some(job) = state.jobs.get(job_id) {
                if job.status != JobState::Processing {
                    return job.clone();
                }
            }
            actix_web::rt::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} did not finish", job_id);
    }

    #[actix_web::test]
    async fn test_analyze_job_completes() {
        let state = state(Ok(REPLY.to_string()));
        let app = test::init_service(App::new().app_data(state.clone()).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/analyze")
            .set_json(serde_json::json!({
                "video_id": "vod42",
                "messages": ["POG", "LETS GO", {"text": "hello", "author_id": "u1"}]
            }))
            .to_request();
        let created: JobCreatedResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(created.status, JobState::Processing);

        let job = wait_for_job(&state, &created.job_id).await;
        assert_eq!(job.status, JobState::Completed);
        assert_eq!(job.progress, 1.0);
        let analysis = job.analysis.unwrap();
        assert_eq!(analysis.video_id, "vod42");
        assert_eq!(analysis.personas.len(), 2);
        assert_eq!(analysis.summary.total_messages, 3);

        let req = test::TestRequest::get()
            .uri(&format!("/api/status/{}", created.job_id))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "completed");
        assert_eq!(body["analysis"]["summary"]["unique_users"], 1);
    }

    #[actix_web::test]
    async fn test_bot_filter_leaving_nothing_is_no_data() {
        let state = state(Ok(REPLY.to_string()));
        let app = test::init_service(App::new().app_data(state.clone()).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/analyze")
            .set_json(serde_json::json!({
                "messages": [{"text": "!commands", "author_name": "Nightbot", "author_id": "b1"}],
                "filter_bots": true
            }))
            .to_request();
        let created: JobCreatedResponse = test::call_and_read_body_json(&app, req).await;

        let job = wait_for_job(&state, &created.job_id).await;
        assert_eq!(job.status, JobState::Failed);
        assert_eq!(job.error.unwrap().kind, JobErrorKind::NoData);
    }

    #[actix_web::test]
    async fn test_rejected_credentials_fail_the_job() {
        let state = state(Err(GatewayError::Unauthorized("401".to_string())));
        let app = test::init_service(App::new().app_data(state.clone()).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/analyze")
            .set_json(serde_json::json!({ "messages": ["hi"] }))
            .to_request();
        let created: JobCreatedResponse = test::call_and_read_body_json(&app, req).await;

        let job = wait_for_job(&state, &created.job_id).await;
        assert_eq!(job.status, JobState::Failed);
        assert_eq!(job.error.unwrap().kind, JobErrorKind::AnalysisFailed);
    }

    #[actix_web::test]
    async fn test_zero_batch_size_is_bad_request() {
        let state = state(Ok(REPLY.to_string()));
        let app = test::init_service(App::new().app_data(state.clone()).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/analyze")
            .set_json(serde_json::json!({ "messages": ["hi"], "batch_size": 0 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(state.jobs.is_empty());
    }

    #[actix_web::test]
    async fn test_unknown_job_is_not_found() {
        let state = state(Ok(REPLY.to_string()));
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::get().uri("/api/status/missing").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "job_not_found");
    }

    #[actix_web::test]
    async fn test_compare_endpoint() {
        let app = test::init_service(App::new().configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/compare")
            .set_json(serde_json::json!({
                "personas_a": [{"name": "Social Player", "share": 40}],
                "personas_b": [{"name": "social player!"}, {"name": "Financial Sponsor"}]
            }))
            .to_request();
        let result: ComparisonResult = test::call_and_read_body_json(&app, req).await;
        assert_eq!(result.matched.len(), 1);
        assert_eq!(result.unique_b.len(), 1);
        assert_eq!(result.unique_b[0].name, "Financial Sponsor");

        let req = test::TestRequest::post()
            .uri("/api/compare")
            .set_json(serde_json::json!({
                "personas_a": [{"name": "Hype Booster", "feedback": ["a", "b", "c", "d", "e", "f", "g"]}],
                "personas_b": [{"name": "Lurker", "key_feedback": [
                    {"label": "Quiet", "comments": ["1", "2", "3", "4"], "recommendation": "Ask questions"}
                ]}]
            }))
            .to_request();
        let result: ComparisonResult = test::call_and_read_body_json(&app, req).await;
        assert_eq!(result.unique_a[0].feedback.len(), 5);
        assert_eq!(result.unique_b[0].key_feedback[0].comments.len(), 3);

        let req = test::TestRequest::post()
            .uri("/api/compare")
            .set_json(serde_json::json!({ "personas_a": [], "personas_b": [], "threshold": 1.5 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
