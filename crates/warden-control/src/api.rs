use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    middleware,
    routing::get,
};
use serde::{Deserialize, Serialize};
use warden_agent::{
    Gateway, GatewayError,
    query::{PlayerEntry, TelemetrySnapshot},
};

use crate::{
    error::ApiError,
    request_meta::{self, RequestMeta},
};

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Serialize)]
struct Healthz {
    status: &'static str,
    version: &'static str,
    read_only: bool,
    profiles: Vec<String>,
}

#[derive(Debug, Serialize)]
struct TextBody {
    text: String,
}

#[derive(Debug, Deserialize)]
struct CommandBody {
    args: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ConfigBody {
    content: String,
}

pub fn router(gateway: Gateway) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/server/is-started", get(default_is_started))
        .route("/api/servers", get(list_profiles))
        .route("/api/servers/:profile/is-started", get(is_started))
        .route("/api/servers/:profile/details", get(details))
        .route(
            "/api/servers/:profile/command",
            axum::routing::post(run_command),
        )
        .route("/api/servers/:profile/info", get(info))
        .route("/api/servers/:profile/players", get(players))
        .route("/api/servers/:profile/configs", get(list_configs))
        .route(
            "/api/servers/:profile/configs/:file",
            get(read_config).put(write_config),
        )
        .layer(middleware::from_fn(request_meta::request_id))
        .with_state(gateway)
}

fn fail(meta: &RequestMeta) -> impl FnOnce(GatewayError) -> ApiError + '_ {
    move |e| ApiError::from_gateway(meta, e)
}

async fn healthz(State(gw): State<Gateway>) -> Json<Healthz> {
    Json(Healthz {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        read_only: gw.settings().read_only,
        profiles: gw.profiles(),
    })
}

async fn default_is_started(
    State(gw): State<Gateway>,
    Extension(meta): Extension<RequestMeta>,
) -> ApiResult<bool> {
    let name = gw.default_profile().name().to_string();
    let started = gw.is_server_started(&name).await.map_err(fail(&meta))?;
    Ok(Json(started))
}

async fn list_profiles(State(gw): State<Gateway>) -> Json<Vec<String>> {
    Json(gw.profiles())
}

async fn is_started(
    State(gw): State<Gateway>,
    Extension(meta): Extension<RequestMeta>,
    Path(profile): Path<String>,
) -> ApiResult<bool> {
    let started = gw.is_server_started(&profile).await.map_err(fail(&meta))?;
    Ok(Json(started))
}

async fn details(
    State(gw): State<Gateway>,
    Extension(meta): Extension<RequestMeta>,
    Path(profile): Path<String>,
) -> ApiResult<TextBody> {
    let text = gw.server_details(&profile).await.map_err(fail(&meta))?;
    Ok(Json(TextBody { text }))
}

async fn run_command(
    State(gw): State<Gateway>,
    Extension(meta): Extension<RequestMeta>,
    Path(profile): Path<String>,
    Json(body): Json<CommandBody>,
) -> ApiResult<TextBody> {
    let text = gw
        .run_command(&profile, &body.args)
        .await
        .map_err(fail(&meta))?;
    Ok(Json(TextBody { text }))
}

async fn info(
    State(gw): State<Gateway>,
    Extension(meta): Extension<RequestMeta>,
    Path(profile): Path<String>,
) -> ApiResult<Option<TelemetrySnapshot>> {
    let snapshot = gw.server_info(&profile).await.map_err(fail(&meta))?;
    Ok(Json(snapshot))
}

async fn players(
    State(gw): State<Gateway>,
    Extension(meta): Extension<RequestMeta>,
    Path(profile): Path<String>,
) -> ApiResult<Vec<PlayerEntry>> {
    let players = gw.players(&profile).await.map_err(fail(&meta))?;
    Ok(Json(players))
}

async fn list_configs(
    State(gw): State<Gateway>,
    Extension(meta): Extension<RequestMeta>,
    Path(profile): Path<String>,
) -> ApiResult<Vec<String>> {
    let files = gw.editable_files(&profile).map_err(fail(&meta))?;
    Ok(Json(files))
}

async fn read_config(
    State(gw): State<Gateway>,
    Extension(meta): Extension<RequestMeta>,
    Path((profile, file)): Path<(String, String)>,
) -> ApiResult<ConfigBody> {
    // Config files are owned by the profile's own account.
    let user = gw.profile(&profile).map_err(fail(&meta))?.os_user().clone();
    let content = gw
        .read_config(&profile, &user, &file)
        .await
        .map_err(fail(&meta))?;
    Ok(Json(ConfigBody { content }))
}

async fn write_config(
    State(gw): State<Gateway>,
    Extension(meta): Extension<RequestMeta>,
    Path((profile, file)): Path<(String, String)>,
    Json(body): Json<ConfigBody>,
) -> ApiResult<ConfigBody> {
    let user = gw.profile(&profile).map_err(fail(&meta))?.os_user().clone();
    gw.write_config(&profile, &user, &file, &body.content)
        .await
        .map_err(fail(&meta))?;
    Ok(Json(body))
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        net::SocketAddr,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use async_trait::async_trait;
    use serde_json::Value;
    use warden_agent::{
        Settings,
        probe::Probe,
        query::{QueryClient, QueryError},
        runner::{PrivilegedRunner, RunError},
        telemetry::TelemetryService,
    };
    use warden_process::{CommandResult, CommandSpec};

    use super::*;
    use crate::request_meta::REQUEST_ID_HEADER;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<CommandSpec>>,
        stdin: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PrivilegedRunner for Recorder {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandResult, RunError> {
            self.seen.lock().unwrap().push(spec.clone());
            let stdout = match spec.program.as_str() {
                "cat" => "sv_cheats 0\n",
                _ => "\x1b[32mStatus:\x1b[0m STARTED\n",
            };
            Ok(CommandResult::new(Some(0), stdout.to_string(), String::new()))
        }

        async fn run_with_stdin(
            &self,
            spec: &CommandSpec,
            content: &str,
        ) -> Result<CommandResult, RunError> {
            self.seen.lock().unwrap().push(spec.clone());
            self.stdin.lock().unwrap().push(content.to_string());
            Ok(CommandResult::new(Some(0), content.to_string(), String::new()))
        }
    }

    struct Down;

    #[async_trait]
    impl Probe for Down {
        async fn reachable(&self, _addr: SocketAddr, _timeout: Duration) -> bool {
            false
        }
    }

    struct NoQuery;

    #[async_trait]
    impl QueryClient for NoQuery {
        async fn info(
            &self,
            _addr: SocketAddr,
            _timeout: Duration,
        ) -> Result<Option<TelemetrySnapshot>, QueryError> {
            Ok(None)
        }

        async fn players(
            &self,
            _addr: SocketAddr,
            _timeout: Duration,
        ) -> Result<Option<Vec<PlayerEntry>>, QueryError> {
            Ok(None)
        }
    }

    async fn spawn(read_only: bool) -> (String, Arc<Recorder>) {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("WARDEN_PROFILES", "css1,css2:27016"),
            ("WARDEN_PUBLIC_ADDR_URL", ""),
            ("WARDEN_READ_ONLY", if read_only { "1" } else { "0" }),
        ]);
        let settings = Settings::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        let runner = Arc::new(Recorder::default());
        let telemetry = TelemetryService::new(
            Arc::new(Down),
            Arc::new(NoQuery),
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        let gw = Gateway::with_parts(settings, runner.clone(), telemetry);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(gw)).await.unwrap();
        });
        (format!("http://{addr}"), runner)
    }

    #[tokio::test]
    async fn healthz_reports_profiles_and_request_id() {
        let (base, _) = spawn(false).await;
        let resp = reqwest::get(format!("{base}/healthz")).await.unwrap();
        assert_eq!(resp.status(), 200);
        assert!(resp.headers().contains_key(REQUEST_ID_HEADER));
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["read_only"], false);
        assert_eq!(body["profiles"], serde_json::json!(["css1", "css2"]));
    }

    #[tokio::test]
    async fn status_routes_use_the_named_profile() {
        let (base, runner) = spawn(false).await;

        let started: bool = reqwest::get(format!("{base}/api/server/is-started"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(started);

        let details: Value = reqwest::get(format!("{base}/api/servers/css2/details"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(details["text"], "Status: STARTED\n");

        let seen = runner.seen.lock().unwrap();
        assert_eq!(seen[0].program, "/home/css1/css1");
        assert_eq!(seen[1].program, "/home/css2/css2");
        assert_eq!(seen[1].run_as.as_str(), "css2");
    }

    #[tokio::test]
    async fn unknown_profile_is_a_json_404() {
        let (base, runner) = spawn(false).await;
        let resp = reqwest::get(format!("{base}/api/servers/nope/is-started"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        let header = resp.headers()[REQUEST_ID_HEADER]
            .to_str()
            .unwrap()
            .to_string();
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["code"], "unknown_profile");
        assert_eq!(body["request_id"], header);
        assert!(runner.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn offline_telemetry_is_null_and_empty() {
        let (base, _) = spawn(false).await;
        let info: Value = reqwest::get(format!("{base}/api/servers/css1/info"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(info.is_null());
        let players: Vec<Value> = reqwest::get(format!("{base}/api/servers/css1/players"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(players.is_empty());
    }

    #[tokio::test]
    async fn configs_act_as_profile_user() {
        let (base, runner) = spawn(false).await;
        let client = reqwest::Client::new();

        let files: Vec<String> = client
            .get(format!("{base}/api/servers/css2/configs"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(
            files,
            vec!["_default.cfg", "common.cfg", "css2.cfg", "mapcycle.txt"]
        );

        let read: Value = client
            .get(format!("{base}/api/servers/css2/configs/common.cfg"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(read["content"], "sv_cheats 0\n");

        let resp = client
            .put(format!("{base}/api/servers/css2/configs/css2.cfg"))
            .json(&serde_json::json!({ "content": "hostname \"Käse\"\n" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let seen = runner.seen.lock().unwrap();
        assert!(seen.iter().all(|s| s.run_as.as_str() == "css2"));
        assert_eq!(seen.last().unwrap().program, "tee");
        assert_eq!(
            *runner.stdin.lock().unwrap(),
            vec!["hostname \"Käse\"\n".to_string()]
        );
    }

    #[tokio::test]
    async fn disallowed_and_oversized_configs_never_spawn() {
        let (base, runner) = spawn(false).await;
        let client = reqwest::Client::new();

        let resp = client
            .get(format!("{base}/api/servers/css1/configs/server.cfg"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 403);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["code"], "not_allowed");

        let resp = client
            .put(format!("{base}/api/servers/css1/configs/common.cfg"))
            .json(&serde_json::json!({ "content": "x".repeat(1024 * 1024 + 1) }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 413);

        assert!(runner.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_only_rejects_mutations() {
        let (base, runner) = spawn(true).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/api/servers/css1/command"))
            .json(&serde_json::json!({ "args": "restart" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 409);

        let resp = client
            .put(format!("{base}/api/servers/css1/configs/common.cfg"))
            .json(&serde_json::json!({ "content": "sv_cheats 1\n" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 409);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["code"], "read_only");

        assert!(runner.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn command_output_is_returned_as_text() {
        let (base, runner) = spawn(false).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/api/servers/css1/command"))
            .json(&serde_json::json!({ "args": "restart" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["text"], "Status: STARTED\n");
        assert_eq!(runner.seen.lock().unwrap()[0].args, vec!["restart"]);

        let resp = reqwest::Client::new()
            .post(format!("{base}/api/servers/css1/command"))
            .json(&serde_json::json!({ "args": "  " }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }
}
