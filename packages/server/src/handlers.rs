//! HTTP handler functions for the roadwatch API.

use actix_web::{HttpResponse, web};
use roadwatch_engine::{EngineError, NewReport, SubmitOutcome};
use roadwatch_report_models::{Coordinate, ROUTE_CORRIDOR_M, ReportId, ReportKind};
use roadwatch_server_models::{
    ApiError, ApiHealth, ApiKind, ApiNewReport, ApiReport, ApiRouteRequest, ApiSubmitResponse,
    NearbyQueryParams, clamp_distance,
};

use crate::AppState;

/// `GET /api/health`
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_reports: state.engine.active_count(),
    })
}

/// `GET /api/kinds`
///
/// Lists the report kinds a client can submit with their alert text.
pub async fn kinds() -> HttpResponse {
    let kinds: Vec<ApiKind> = ReportKind::all()
        .iter()
        .map(|kind| ApiKind {
            kind: *kind,
            message: roadwatch_alert::message(*kind).to_string(),
        })
        .collect();

    HttpResponse::Ok().json(kinds)
}

/// `POST /api/reports`
///
/// Submits a report. Responds 201 when it is accepted and 200 with
/// `accepted: false` when an active report already covers the hazard.
pub async fn submit_report(
    state: web::Data<AppState>,
    body: web::Json<ApiNewReport>,
) -> HttpResponse {
    let body = body.into_inner();
    let mut new_report = NewReport::new(body.kind, body.location());
    if let Some(description) = body.description {
        new_report = new_report.with_description(description);
    }
    if let Some(reporter) = body.reporter {
        new_report = new_report.with_reporter(reporter);
    }

    match state.engine.submit(new_report) {
        Ok(SubmitOutcome::Accepted(report)) => {
            let alert = roadwatch_alert::evaluate(&report, report.created_at());
            HttpResponse::Created().json(ApiSubmitResponse {
                accepted: true,
                report: Some(ApiReport::from(alert)),
            })
        }
        Ok(SubmitOutcome::Duplicate { .. }) => HttpResponse::Ok().json(ApiSubmitResponse {
            accepted: false,
            report: None,
        }),
        Err(e) => error_response(&e, "Failed to submit report"),
    }
}

/// `GET /api/reports/{id}`
pub async fn get_report(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let Ok(id) = path.parse::<ReportId>() else {
        return HttpResponse::BadRequest().json(ApiError::new(format!(
            "Invalid report id: {}",
            path.as_str()
        )));
    };

    match state.engine.get(id) {
        Some(report) => {
            let alert = roadwatch_alert::evaluate(&report, state.engine.now());
            HttpResponse::Ok().json(ApiReport::from(alert))
        }
        None => HttpResponse::NotFound().json(ApiError::new(format!("No active report {id}"))),
    }
}

/// `GET /api/reports/nearby`
///
/// Alerts for active reports around `lat`/`lng`, nearest first.
pub async fn nearby(
    state: web::Data<AppState>,
    params: web::Query<NearbyQueryParams>,
) -> HttpResponse {
    match state
        .engine
        .alerts_near_point(params.center(), params.radius_m())
    {
        Ok(alerts) => {
            let reports: Vec<ApiReport> = alerts.into_iter().map(ApiReport::from).collect();
            HttpResponse::Ok().json(reports)
        }
        Err(e) => error_response(&e, "Failed to query nearby reports"),
    }
}

/// `POST /api/reports/route`
///
/// Alerts for active reports within the corridor around a route.
pub async fn route(state: web::Data<AppState>, body: web::Json<ApiRouteRequest>) -> HttpResponse {
    let points: Vec<Coordinate> = body.points.iter().copied().map(Coordinate::from).collect();
    let corridor = body.corridor.map_or(ROUTE_CORRIDOR_M, clamp_distance);

    match state.engine.alerts_near_route(&points, corridor) {
        Ok(alerts) => {
            let reports: Vec<ApiReport> = alerts.into_iter().map(ApiReport::from).collect();
            HttpResponse::Ok().json(reports)
        }
        Err(e) => error_response(&e, "Failed to query route reports"),
    }
}

fn error_response(e: &EngineError, context: &str) -> HttpResponse {
    if e.is_invalid_input() {
        HttpResponse::BadRequest().json(ApiError::new(e.to_string()))
    } else {
        log::error!("{context}: {e}");
        HttpResponse::InternalServerError().json(ApiError::new(context))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::http::StatusCode;
    use actix_web::{App, test};
    use chrono::{DateTime, TimeDelta, Utc};
    use roadwatch_alert::AlertSeverity;
    use roadwatch_engine::ReportEngine;
    use roadwatch_engine::clock::ManualClock;
    use serde_json::json;

    use super::*;
    use crate::configure;

    fn state() -> (web::Data<AppState>, Arc<ManualClock>) {
        let t0 = DateTime::parse_from_rfc3339("2025-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let clock = Arc::new(ManualClock::new(t0));
        let engine = Arc::new(ReportEngine::new().with_clock(clock.clone()));
        (web::Data::new(AppState { engine }), clock)
    }

    fn accident_body() -> serde_json::Value {
        json!({
            "kind": "accident",
            "latitude": 32.08,
            "longitude": 34.78,
            "description": "Two cars, right lane",
        })
    }

    #[actix_web::test]
    async fn health_reports_active_count() {
        let (state, _clock) = state();
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::get().uri("/api/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["healthy"], json!(true));
        assert_eq!(body["activeReports"], json!(0));
    }

    #[actix_web::test]
    async fn kinds_lists_every_kind() {
        let (state, _clock) = state();
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::get().uri("/api/kinds").to_request();
        let kinds: Vec<ApiKind> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(kinds.len(), ReportKind::all().len());
        assert_eq!(kinds[1].kind, ReportKind::SpeedCamera);
        assert_eq!(kinds[1].message, "Speed camera ahead");
    }

    #[actix_web::test]
    async fn submit_then_duplicate() {
        let (state, _clock) = state();
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/reports")
            .set_json(accident_body())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: ApiSubmitResponse = test::read_body_json(resp).await;
        assert!(body.accepted);
        let report = body.report.unwrap();
        assert_eq!(report.kind, ReportKind::Accident);
        assert_eq!(report.severity, AlertSeverity::High);
        assert_eq!(report.description.as_deref(), Some("Two cars, right lane"));

        let req = test::TestRequest::post()
            .uri("/api/reports")
            .set_json(accident_body())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({ "accepted": false }));
    }

    #[actix_web::test]
    async fn submit_rejects_out_of_range_location() {
        let (state, _clock) = state();
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/reports")
            .set_json(json!({ "kind": "police", "latitude": 95.0, "longitude": 0.0 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: ApiError = test::read_body_json(resp).await;
        assert!(body.error.contains("95"));
    }

    #[actix_web::test]
    async fn get_report_by_id() {
        let (state, clock) = state();
        let engine = state.engine.clone();
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let report = engine
            .submit(NewReport::new(
                ReportKind::Police,
                Coordinate::new(32.08, 34.78),
            ))
            .unwrap()
            .report()
            .clone();

        clock.advance(TimeDelta::minutes(31));
        let req = test::TestRequest::get()
            .uri(&format!("/api/reports/{}", report.id()))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: ApiReport = test::read_body_json(resp).await;
        assert_eq!(body.id, report.id());
        assert_eq!(body.severity, AlertSeverity::Low);

        clock.advance(TimeDelta::minutes(15));
        let req = test::TestRequest::get()
            .uri(&format!("/api/reports/{}", report.id()))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::get()
            .uri("/api/reports/not-a-uuid")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn nearby_returns_reports_in_radius() {
        let (state, _clock) = state();
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/reports")
            .set_json(accident_body())
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::get()
            .uri("/api/reports/nearby?lat=32.081&lng=34.78")
            .to_request();
        let reports: Vec<ApiReport> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, ReportKind::Accident);

        let req = test::TestRequest::get()
            .uri("/api/reports/nearby?lat=32.081&lng=34.78&radius=50")
            .to_request();
        let reports: Vec<ApiReport> = test::call_and_read_body_json(&app, req).await;
        assert!(reports.is_empty());

        let req = test::TestRequest::get()
            .uri("/api/reports/nearby?lat=32.081&lng=34.78&radius=-1")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn route_returns_reports_in_corridor() {
        let (state, _clock) = state();
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/reports")
            .set_json(accident_body())
            .to_request();
        test::call_service(&app, req).await;

        let route = json!({
            "points": [
                { "latitude": 32.075, "longitude": 34.775 },
                { "latitude": 32.0801, "longitude": 34.7801 },
                { "latitude": 32.085, "longitude": 34.785 },
            ],
        });
        let req = test::TestRequest::post()
            .uri("/api/reports/route")
            .set_json(route)
            .to_request();
        let reports: Vec<ApiReport> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(reports.len(), 1);

        let far_route = json!({
            "points": [{ "latitude": 32.2, "longitude": 34.9 }],
            "corridor": 1000.0,
        });
        let req = test::TestRequest::post()
            .uri("/api/reports/route")
            .set_json(far_route)
            .to_request();
        let reports: Vec<ApiReport> = test::call_and_read_body_json(&app, req).await;
        assert!(reports.is_empty());
    }
}
