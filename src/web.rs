use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use actix_session::storage::CookieSessionStore;
use actix_session::{Session, SessionMiddleware};
use actix_web::cookie::Key;
use actix_web::{middleware, web, App, HttpResponse, HttpServer, Result};
use chrono::{Local, NaiveDate};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ScheduleConfig;
use crate::coordinator::{MutationOutcome, RefreshPolicy, SlotCoordinator, EDIT_HINT};
use crate::error::SlotError;
use crate::export::window_csv_string;
use crate::roster::Roster;
use crate::slot::{parse_date, DateRange, Period, SlotKey, StoredSlot, WeekWindow};
use crate::store::SlotStore;

const VIEW_KEY: &str = "view";

/// Shared server state. Each browser view gets its own coordinator.
pub struct AppState {
    pub store: Arc<dyn SlotStore>,
    pub roster: Roster,
    pub policy: RefreshPolicy,
    pub default_weeks: u8,
    pub max_views: usize,
    views: Mutex<HashMap<String, View>>,
}

struct View {
    coordinator: Arc<SlotCoordinator>,
    last_used: Instant,
}

impl AppState {
    pub fn new(store: Arc<dyn SlotStore>, config: &ScheduleConfig) -> Self {
        Self {
            store,
            roster: Roster::new(config.employees.clone()),
            policy: config.refresh,
            default_weeks: config.weeks,
            max_views: config.server.max_views.max(1),
            views: Mutex::new(HashMap::new()),
        }
    }

    /// Number of live views.
    pub fn view_count(&self) -> usize {
        self.views.lock().unwrap().len()
    }

    /// The coordinator behind this session's view, created on first use.
    fn view(&self, session: &Session) -> Result<Arc<SlotCoordinator>> {
        let id = match session.get::<String>(VIEW_KEY)? {
            Some(id) => id,
            None => {
                let id = format!("{:032x}", rand::thread_rng().gen::<u128>());
                session.insert(VIEW_KEY, &id)?;
                id
            }
        };

        let mut views = self.views.lock().unwrap();
        if let Some(view) = views.get_mut(&id) {
            view.last_used = Instant::now();
            return Ok(view.coordinator.clone());
        }

        if views.len() >= self.max_views {
            let oldest = views
                .iter()
                .min_by_key(|(_, v)| v.last_used)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                debug!(view = %oldest, "evicting least recently used view");
                views.remove(&oldest);
            }
        }

        let coordinator = Arc::new(SlotCoordinator::new(self.store.clone(), self.policy));
        views.insert(
            id,
            View {
                coordinator: coordinator.clone(),
                last_used: Instant::now(),
            },
        );
        Ok(coordinator)
    }
}

#[derive(Deserialize)]
pub struct WindowQuery {
    date: Option<String>,
    weeks: Option<u8>,
}

#[derive(Deserialize)]
pub struct SetRequest {
    value: String,
}

#[derive(Deserialize)]
pub struct TransferRequest {
    source: String,
    target: String,
}

#[derive(Serialize)]
pub struct WindowResponse {
    start: NaiveDate,
    end: NaiveDate,
    days: Vec<NaiveDate>,
    employees: Vec<String>,
    periods: Vec<Period>,
    slots: BTreeMap<String, StoredSlot>,
    error: Option<String>,
}

#[derive(Serialize)]
pub struct EditResponse {
    key: String,
    existing: Option<String>,
    hint: &'static str,
}

#[derive(Serialize)]
pub struct MutationResponse {
    success: bool,
    outcome: MutationOutcome,
    /// Set when the mutation went through but the reload after it failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn error_response(err: &SlotError) -> HttpResponse {
    let body = serde_json::json!({"success": false, "error": err.to_string()});
    match err {
        SlotError::NotLoaded(_) => HttpResponse::Conflict().json(body),
        _ if err.is_store_failure() => HttpResponse::BadGateway().json(body),
        _ => HttpResponse::BadRequest().json(body),
    }
}

fn no_window() -> HttpResponse {
    HttpResponse::BadRequest().json(serde_json::json!({
        "success": false,
        "error": "no active window; request /api/slots first"
    }))
}

fn window_response(
    state: &AppState,
    range: DateRange,
    coordinator: &SlotCoordinator,
) -> WindowResponse {
    WindowResponse {
        start: range.start,
        end: range.end,
        days: range.days(),
        employees: state.roster.employees().to_vec(),
        periods: state.roster.periods().to_vec(),
        slots: coordinator
            .snapshot()
            .into_iter()
            .map(|(key, stored)| (key.storage_id(), stored))
            .collect(),
        error: coordinator.last_error(),
    }
}

fn mutation_response(
    coordinator: &SlotCoordinator,
    result: crate::error::Result<MutationOutcome>,
) -> HttpResponse {
    match result {
        Ok(outcome) => HttpResponse::Ok().json(MutationResponse {
            success: true,
            outcome,
            error: coordinator.last_error(),
        }),
        Err(e) => error_response(&e),
    }
}

fn transfer_keys(
    state: &AppState,
    req: &TransferRequest,
) -> crate::error::Result<(SlotKey, SlotKey)> {
    Ok((
        state.roster.parse_id(&req.source)?,
        state.roster.parse_id(&req.target)?,
    ))
}

// Window endpoint
async fn get_window(
    query: web::Query<WindowQuery>,
    session: Session,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let anchor = match query.date.as_deref() {
        Some(d) => match parse_date(d) {
            Ok(date) => date,
            Err(e) => return Ok(error_response(&e)),
        },
        None => Local::now().date_naive(),
    };
    let window = match WeekWindow::new(anchor, query.weeks.unwrap_or(state.default_weeks)) {
        Ok(w) => w,
        Err(e) => return Ok(error_response(&e)),
    };

    let coordinator = state.view(&session)?;
    if let Err(e) = coordinator.request_range(window.range()).await {
        return Ok(error_response(&e));
    }
    Ok(HttpResponse::Ok().json(window_response(&state, window.range(), &coordinator)))
}

// Revalidate endpoint
async fn revalidate(session: Session, state: web::Data<AppState>) -> Result<HttpResponse> {
    let coordinator = state.view(&session)?;
    let Some(range) = coordinator.range() else {
        return Ok(no_window());
    };
    if let Err(e) = coordinator.revalidate().await {
        return Ok(error_response(&e));
    }
    Ok(HttpResponse::Ok().json(window_response(&state, range, &coordinator)))
}

// Edit intent endpoint
async fn begin_edit(
    path: web::Path<(String, String, String)>,
    session: Session,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let (date, period, employee) = path.into_inner();
    let key = match state.roster.key(&date, &period, &employee) {
        Ok(key) => key,
        Err(e) => return Ok(error_response(&e)),
    };
    let intent = state.view(&session)?.begin_edit(key);
    Ok(HttpResponse::Ok().json(EditResponse {
        key: intent.key.storage_id(),
        existing: intent.existing,
        hint: EDIT_HINT,
    }))
}

// Set endpoint
async fn set_slot(
    path: web::Path<(String, String, String)>,
    req: web::Json<SetRequest>,
    session: Session,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let (date, period, employee) = path.into_inner();
    let key = match state.roster.key(&date, &period, &employee) {
        Ok(key) => key,
        Err(e) => return Ok(error_response(&e)),
    };
    let coordinator = state.view(&session)?;
    let result = coordinator.set(key, &req.value).await;
    Ok(mutation_response(&coordinator, result))
}

// Copy endpoint
async fn copy_slot(
    req: web::Json<TransferRequest>,
    session: Session,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let (source, target) = match transfer_keys(&state, &req) {
        Ok(keys) => keys,
        Err(e) => return Ok(error_response(&e)),
    };
    let coordinator = state.view(&session)?;
    let result = coordinator.copy(&source, target).await;
    Ok(mutation_response(&coordinator, result))
}

// Move endpoint
async fn move_slot(
    req: web::Json<TransferRequest>,
    session: Session,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let (source, target) = match transfer_keys(&state, &req) {
        Ok(keys) => keys,
        Err(e) => return Ok(error_response(&e)),
    };
    let coordinator = state.view(&session)?;
    let result = coordinator.move_slot(source, target).await;
    Ok(mutation_response(&coordinator, result))
}

// CSV export of the active window
async fn export_csv(session: Session, state: web::Data<AppState>) -> Result<HttpResponse> {
    let coordinator = state.view(&session)?;
    let Some(range) = coordinator.range() else {
        return Ok(no_window());
    };
    let csv = window_csv_string(&range, &coordinator.snapshot(), &state.roster)
        .map_err(actix_web::error::ErrorInternalServerError)?;
    Ok(HttpResponse::Ok()
        .content_type("text/csv; charset=utf-8")
        .insert_header((
            "Content-Disposition",
            format!("attachment; filename=\"schedule_{}_{}.csv\"", range.start, range.end),
        ))
        .body(csv))
}

/// Registers the API routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/slots", web::get().to(get_window))
        .route("/api/slots/revalidate", web::post().to(revalidate))
        .route("/api/slots/copy", web::post().to(copy_slot))
        .route("/api/slots/move", web::post().to(move_slot))
        .route("/api/export.csv", web::get().to(export_csv))
        .service(
            web::resource("/api/slots/{date}/{period}/{employee}")
                .route(web::get().to(begin_edit))
                .route(web::put().to(set_slot)),
        );
}

/// Cookie session carrying the view id.
pub fn session_middleware(key: Key) -> SessionMiddleware<CookieSessionStore> {
    SessionMiddleware::builder(CookieSessionStore::default(), key)
        .cookie_secure(false)
        .build()
}

pub async fn start_server(
    config: ScheduleConfig,
    store: Arc<dyn SlotStore>,
) -> std::io::Result<()> {
    let bind = config.server.bind.clone();
    let port = config.server.port;
    let app_state = web::Data::new(AppState::new(store.clone(), &config));
    let key = Key::generate();

    info!(%bind, port, store = store.name(), "starting web server");

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(session_middleware(key.clone()))
            .wrap(middleware::Logger::default())
            .configure(configure)
    })
    .bind((bind.as_str(), port))?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::slot::{Slot, SlotMap};
    use crate::store::MemoryStore;
    use actix_web::cookie::Cookie;
    use actix_web::http::StatusCode;
    use actix_web::test;
    use async_trait::async_trait;

    fn state_with(store: Arc<dyn SlotStore>, max_views: usize) -> web::Data<AppState> {
        let mut config = ScheduleConfig::default();
        config.server.max_views = max_views;
        web::Data::new(AppState::new(store, &config))
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data($state.clone())
                    .wrap(session_middleware(Key::generate()))
                    .configure(configure),
            )
            .await
        };
    }

    fn session_cookie<B>(resp: &actix_web::dev::ServiceResponse<B>) -> Cookie<'static> {
        resp.response()
            .cookies()
            .next()
            .expect("session cookie")
            .into_owned()
    }

    #[actix_web::test]
    async fn edit_move_and_reload_through_one_view() {
        let state = state_with(Arc::new(MemoryStore::new()), 8);
        let app = app!(state);

        let req = test::TestRequest::get()
            .uri("/api/slots?date=2025-01-08&weeks=1")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let cookie = session_cookie(&resp);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["start"], "2025-01-06");
        assert_eq!(body["end"], "2025-01-12");
        assert_eq!(body["days"].as_array().unwrap().len(), 7);

        let req = test::TestRequest::put()
            .uri("/api/slots/2025-01-06/AM/JOSH")
            .cookie(cookie.clone())
            .set_json(serde_json::json!({"value": "  Acme Ltd  "}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["outcome"], "applied");

        let req = test::TestRequest::get()
            .uri("/api/slots/2025-01-06/AM/JOSH")
            .cookie(cookie.clone())
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["existing"], "Acme Ltd");
        assert_eq!(body["key"], "2025-01-06_AM_JOSH");

        let req = test::TestRequest::post()
            .uri("/api/slots/move")
            .cookie(cookie.clone())
            .set_json(serde_json::json!({
                "source": "2025-01-06_AM_JOSH",
                "target": "2025-01-07_PM_ALEX",
            }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["outcome"], "applied");

        let req = test::TestRequest::post()
            .uri("/api/slots/revalidate")
            .cookie(cookie.clone())
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let slots = body["slots"].as_object().unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots["2025-01-07_PM_ALEX"]["value"], "Acme Ltd");
        assert_eq!(slots["2025-01-07_PM_ALEX"]["employee"], "ALEX");

        assert_eq!(state.view_count(), 1);
    }

    #[actix_web::test]
    async fn copy_from_empty_source_reports_noop() {
        let state = state_with(Arc::new(MemoryStore::new()), 8);
        let app = app!(state);
        let transfer = serde_json::json!({
            "source": "2025-01-06_AM_JOSH",
            "target": "2025-01-06_AM_JOE",
        });

        // nothing loaded yet: the source's state is unknown
        let req = test::TestRequest::post()
            .uri("/api/slots/copy")
            .set_json(transfer.clone())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::get()
            .uri("/api/slots?date=2025-01-06")
            .to_request();
        let resp = test::call_service(&app, req).await;
        let cookie = session_cookie(&resp);

        let req = test::TestRequest::post()
            .uri("/api/slots/copy")
            .cookie(cookie)
            .set_json(transfer)
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["outcome"], "noop");
        assert!(body.get("error").is_none());
    }

    /// Memory store whose range fetches fail until `healthy` is set.
    struct FlakyStore {
        inner: MemoryStore,
        healthy: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl SlotStore for FlakyStore {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn fetch_range(
            &self,
            range: &DateRange,
        ) -> std::result::Result<SlotMap, StoreError> {
            if !self.healthy.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(StoreError::Api {
                    status: 503,
                    message: "UNAVAILABLE".to_string(),
                });
            }
            self.inner.fetch_range(range).await
        }

        async fn write(&self, slot: &Slot) -> std::result::Result<StoredSlot, StoreError> {
            self.inner.write(slot).await
        }

        async fn clear(&self, key: &SlotKey) -> std::result::Result<(), StoreError> {
            self.inner.clear(key).await
        }
    }

    #[actix_web::test]
    async fn blank_put_after_failed_load_clears_the_booking() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            healthy: std::sync::atomic::AtomicBool::new(false),
        });
        store
            .inner
            .write(&Slot::new(
                SlotKey::parse("2025-01-06_AM_JOSH").unwrap(),
                crate::slot::Booking::new("Acme Ltd").unwrap(),
            ))
            .await
            .unwrap();
        let state = state_with(store.clone(), 8);
        let app = app!(state);

        let req = test::TestRequest::get()
            .uri("/api/slots?date=2025-01-06")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let cookie = session_cookie(&resp);

        let req = test::TestRequest::put()
            .uri("/api/slots/2025-01-06/AM/JOSH")
            .cookie(cookie.clone())
            .set_json(serde_json::json!({"value": ""}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["outcome"], "applied");
        // the reload after the clear failed too
        assert!(body["error"].as_str().unwrap().contains("UNAVAILABLE"));
        assert!(store.inner.is_empty());

        store
            .healthy
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let req = test::TestRequest::post()
            .uri("/api/slots/revalidate")
            .cookie(cookie)
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert!(body["slots"].as_object().unwrap().is_empty());
        assert!(body["error"].is_null());
    }

    #[actix_web::test]
    async fn bad_input_is_a_client_error() {
        let state = state_with(Arc::new(MemoryStore::new()), 8);
        let app = app!(state);

        for (method, uri, body) in [
            ("PUT", "/api/slots/2025-01-06/AM/MALLORY", serde_json::json!({"value": "x"})),
            ("PUT", "/api/slots/2025-01-06/NOON/JOSH", serde_json::json!({"value": "x"})),
            (
                "POST",
                "/api/slots/move",
                serde_json::json!({"source": "junk", "target": "2025-01-06_AM_JOE"}),
            ),
        ] {
            let req = match method {
                "PUT" => test::TestRequest::put(),
                _ => test::TestRequest::post(),
            }
            .uri(uri)
            .set_json(body)
            .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{uri}");
        }

        let req = test::TestRequest::get()
            .uri("/api/slots?date=2025-01-08&weeks=3")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::get().uri("/api/export.csv").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    struct DeniedStore;

    #[async_trait]
    impl SlotStore for DeniedStore {
        fn name(&self) -> &str {
            "denied"
        }

        async fn fetch_range(
            &self,
            _range: &DateRange,
        ) -> std::result::Result<SlotMap, StoreError> {
            Err(StoreError::Api {
                status: 403,
                message: "PERMISSION_DENIED".to_string(),
            })
        }

        async fn write(&self, _slot: &Slot) -> std::result::Result<StoredSlot, StoreError> {
            Err(StoreError::Api {
                status: 403,
                message: "PERMISSION_DENIED".to_string(),
            })
        }

        async fn clear(&self, _key: &SlotKey) -> std::result::Result<(), StoreError> {
            Ok(())
        }
    }

    #[actix_web::test]
    async fn store_failures_are_bad_gateway() {
        let state = state_with(Arc::new(DeniedStore), 8);
        let app = app!(state);

        let req = test::TestRequest::get()
            .uri("/api/slots?date=2025-01-08")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("PERMISSION_DENIED"));

        let req = test::TestRequest::put()
            .uri("/api/slots/2025-01-06/PM/JOE")
            .set_json(serde_json::json!({"value": "Acme Ltd"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_GATEWAY);
    }

    #[actix_web::test]
    async fn views_are_isolated_and_capped() {
        let state = state_with(Arc::new(MemoryStore::new()), 2);
        let app = app!(state);

        for date in ["2025-01-08", "2025-02-05", "2025-03-05"] {
            let req = test::TestRequest::get()
                .uri(&format!("/api/slots?date={date}"))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        }
        assert_eq!(state.view_count(), 2);
    }

    #[actix_web::test]
    async fn export_serves_the_active_window() {
        let state = state_with(Arc::new(MemoryStore::new()), 8);
        let app = app!(state);

        let req = test::TestRequest::get()
            .uri("/api/slots?date=2025-01-06")
            .to_request();
        let resp = test::call_service(&app, req).await;
        let cookie = session_cookie(&resp);

        let req = test::TestRequest::put()
            .uri("/api/slots/2025-01-06/AM/JOSH")
            .cookie(cookie.clone())
            .set_json(serde_json::json!({"value": "Acme Ltd"}))
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::get()
            .uri("/api/export.csv")
            .cookie(cookie)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        let text = std::str::from_utf8(&body).unwrap();
        assert!(text.starts_with("date,period,JOSH,JOE,ALEX,FRANCES\n"));
        assert!(text.contains("2025-01-06,AM,Acme Ltd,,,\n"));
        assert_eq!(text.lines().count(), 1 + 7 * 2);
    }
}
