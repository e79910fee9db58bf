//! The HTTP control API.
//!
//! Thin handlers over the daemon core: every endpoint parses its inputs,
//! takes the cartridge lock through the daemon and renders the outcome.
//! Replies are negotiated via `Accept`: JSON or plain text. Blocking
//! cartridge work runs on the blocking pool, never on the runtime.
use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::Router;
use log::info;
use serde::Serialize;
use serde_json::json;

use mdrived_core::fs;
use mdrived_formats::{split_name_type_compressor, CartReader, Format, Params};

use crate::daemon::{Daemon, DaemonError};
use crate::repo::{self, RepoIndex};

/// Maximum body size for direct cartridge uploads.
const MAX_BODY: usize = 1 << 20;

const DEFAULT_SEARCH_ITEMS: usize = 25;

pub struct ApiState {
    pub daemon: Arc<Daemon>,
    pub index: Option<Arc<RepoIndex>>,
    pub repo_dir: Option<PathBuf>,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/version", get(version))
        .route("/config", get(get_config).put(put_config))
        .route("/drive/:drive/ls", get(drive_ls))
        .route("/drive/:drive/dump", get(drive_dump))
        .route("/drive/:drive", put(drive_load))
        .route("/map", get(get_map).put(put_map))
        .route("/search", get(search))
        .with_state(state)
}

type Args = HashMap<String, String>;

fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("application/json"))
        .unwrap_or(false)
}

fn reply<T: Serialize>(json_wanted: bool, status: StatusCode, body: &T, text: String) -> Response {
    if json_wanted {
        let body = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
        (
            status,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response()
    } else {
        (status, [(header::CONTENT_TYPE, "text/plain")], text).into_response()
    }
}

fn text_reply(status: StatusCode, text: impl Into<String>) -> Response {
    (status, [(header::CONTENT_TYPE, "text/plain")], text.into()).into_response()
}

fn error_reply(json_wanted: bool, status: StatusCode, msg: String) -> Response {
    reply(
        json_wanted,
        status,
        &json!({ "error": msg }),
        format!("{}\n", msg),
    )
}

fn daemon_error(json_wanted: bool, e: DaemonError) -> Response {
    let status = match &e {
        DaemonError::Busy(_) => StatusCode::LOCKED,
        DaemonError::Conflict(_) => StatusCode::CONFLICT,
        DaemonError::InvalidDrive(_) | DaemonError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
        DaemonError::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
        DaemonError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_reply(json_wanted, status, e.to_string())
}

fn arg(args: &Args, name: &str) -> String {
    args.get(name).cloned().unwrap_or_default()
}

fn flag(args: &Args, name: &str) -> bool {
    matches!(args.get(name).map(String::as_str), Some("true") | Some("1") | Some(""))
}

fn parse_drive(args_drive: usize, json_wanted: bool) -> Result<usize, Response> {
    if (1..=crate::daemon::DRIVE_COUNT).contains(&args_drive) {
        Ok(args_drive)
    } else {
        Err(error_reply(
            json_wanted,
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("invalid drive number: {}", args_drive),
        ))
    }
}

async fn version(State(state): State<Arc<ApiState>>, headers: HeaderMap) -> Response {
    let adapter = state.daemon.adapter_info();
    let daemon = env!("CARGO_PKG_VERSION");
    let (protocol, firmware) = adapter
        .map(|a| (a.protocol.to_string(), a.firmware.to_string()))
        .unwrap_or_else(|| ("offline".to_string(), "offline".to_string()));
    reply(
        wants_json(&headers),
        StatusCode::OK,
        &json!({
            "daemon": daemon,
            "adapter_protocol": protocol,
            "adapter_firmware": firmware,
        }),
        format!(
            "daemon: {}\nadapter protocol: {}\nadapter firmware: {}\n",
            daemon, protocol, firmware
        ),
    )
}

async fn get_config(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(args): Query<Args>,
) -> Response {
    let json_wanted = wants_json(&headers);
    let item = arg(&args, "item");
    if item.is_empty() {
        return error_reply(
            json_wanted,
            StatusCode::UNPROCESSABLE_ENTITY,
            "missing config item".to_string(),
        );
    }
    let (arg1, arg2) = state.daemon.config_item(&item).unwrap_or((0, 0));
    reply(
        json_wanted,
        StatusCode::OK,
        &json!({ "item": item, "arg1": arg1, "arg2": arg2 }),
        format!("{}: {} {}\n", item, arg1, arg2),
    )
}

async fn put_config(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(args): Query<Args>,
) -> Response {
    let json_wanted = wants_json(&headers);
    let item = arg(&args, "item");
    let arg1 = arg(&args, "arg1").parse::<u8>().unwrap_or(0);
    let arg2 = arg(&args, "arg2").parse::<u8>().unwrap_or(0);
    match state.daemon.configure(&item, arg1, arg2) {
        Ok(()) => reply(
            json_wanted,
            StatusCode::OK,
            &json!({ "item": item, "arg1": arg1, "arg2": arg2 }),
            format!("configured {}\n", item),
        ),
        Err(e) => daemon_error(json_wanted, e),
    }
}

#[derive(Serialize)]
struct FileEntry {
    name: String,
    size: usize,
    #[serde(rename = "type")]
    file_type: String,
}

async fn drive_ls(
    State(state): State<Arc<ApiState>>,
    Path(drive): Path<usize>,
    headers: HeaderMap,
) -> Response {
    let json_wanted = wants_json(&headers);
    let drive = match parse_drive(drive, json_wanted) {
        Ok(d) => d,
        Err(r) => return r,
    };

    if state.daemon.is_hardware_drive(drive) {
        return text_reply(
            StatusCode::OK,
            format!("hardware drive mapped to slot {}\n", drive),
        );
    }

    let daemon = Arc::clone(&state.daemon);
    let result = tokio::task::spawn_blocking(move || {
        let (guard, lockable) = daemon.get_cartridge(drive);
        match (guard, lockable) {
            (None, false) => Err((StatusCode::LOCKED, format!("drive {} busy", drive))),
            (None, true) => Err((
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("no cartridge in drive {}", drive),
            )),
            (Some(guard), _) => {
                let name = guard.name().trim_end().to_string();
                fs::ls(&guard)
                    .map(|(stats, files)| (name, stats, files))
                    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
            }
        }
    })
    .await;

    match result {
        Err(e) => error_reply(json_wanted, StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        Ok(Err((status, msg))) => error_reply(json_wanted, status, msg),
        Ok(Ok((name, stats, files))) => {
            let mut text = format!("\n{}\n\n", name);
            let mut entries = Vec::with_capacity(files.len());
            for f in &files {
                let file_type = f
                    .annotations
                    .get("file-type")
                    .map(|a| a.as_str().to_string())
                    .unwrap_or_default();
                text.push_str(&format!("{:<16}{:>8}  {:<6}\n", f.name(), f.size(), file_type));
                entries.push(FileEntry {
                    name: f.name().to_string(),
                    size: f.size(),
                    file_type,
                });
            }
            text.push_str(&format!(
                "\n{} of {} sectors used ({}kb free)\n\n",
                stats.used(),
                stats.sectors(),
                (stats.sectors() - stats.used()) / 2
            ));
            reply(
                json_wanted,
                StatusCode::OK,
                &json!({
                    "name": name,
                    "files": entries,
                    "sectors": stats.sectors(),
                    "used": stats.used(),
                }),
                text,
            )
        }
    }
}

fn hexdump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 4);
    for (i, chunk) in data.chunks(16).enumerate() {
        out.push_str(&format!("{:08x}  ", i * 16));
        for b in chunk {
            out.push_str(&format!("{:02x} ", b));
        }
        for _ in chunk.len()..16 {
            out.push_str("   ");
        }
        out.push(' ');
        for b in chunk {
            out.push(if (0x20..0x7f).contains(b) { *b as char } else { '.' });
        }
        out.push('\n');
    }
    out
}

async fn drive_dump(
    State(state): State<Arc<ApiState>>,
    Path(drive): Path<usize>,
    headers: HeaderMap,
    Query(args): Query<Args>,
) -> Response {
    let json_wanted = wants_json(&headers);
    let drive = match parse_drive(drive, json_wanted) {
        Ok(d) => d,
        Err(r) => return r,
    };
    let file = arg(&args, "file");

    let daemon = Arc::clone(&state.daemon);
    let result = tokio::task::spawn_blocking(move || {
        let (guard, lockable) = daemon.get_cartridge(drive);
        match (guard, lockable) {
            (None, false) => Err((StatusCode::LOCKED, format!("drive {} busy", drive))),
            (None, true) => Err((
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("no cartridge in drive {}", drive),
            )),
            (Some(guard), _) => {
                if file.is_empty() {
                    let mut out = String::new();
                    for (ix, sec) in guard.iter() {
                        out.push_str(&format!("\nslot {:3}, sector {:3}\n", ix, sec.index()));
                        if let Some(h) = sec.header() {
                            out.push_str(&hexdump(h.demuxed()));
                        }
                        if let Some(r) = sec.record() {
                            out.push_str(&hexdump(r.demuxed()));
                        }
                    }
                    Ok(out)
                } else {
                    let mut f = fs::open(&guard, &file)
                        .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;
                    let mut bytes = Vec::new();
                    f.read_to_end(&mut bytes)
                        .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;
                    Ok(hexdump(&bytes))
                }
            }
        }
    })
    .await;

    match result {
        Err(e) => error_reply(json_wanted, StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        Ok(Err((status, msg))) => error_reply(json_wanted, status, msg),
        Ok(Ok(dump)) => text_reply(StatusCode::OK, dump),
    }
}

async fn drive_load(
    State(state): State<Arc<ApiState>>,
    Path(drive): Path<usize>,
    headers: HeaderMap,
    Query(args): Query<Args>,
    body: Bytes,
) -> Response {
    let json_wanted = wants_json(&headers);
    let drive = match parse_drive(drive, json_wanted) {
        Ok(d) => d,
        Err(r) => return r,
    };

    let force = flag(&args, "force");

    if flag(&args, "unload") {
        return match state.daemon.unload_cartridge(drive, force) {
            Ok(()) => reply(
                json_wanted,
                StatusCode::OK,
                &json!({ "drive": drive, "unloaded": true }),
                format!("unloaded drive {}\n", drive),
            ),
            Err(e) => daemon_error(json_wanted, e),
        };
    }

    let reference = arg(&args, "ref");
    if reference.is_empty() && body.len() > MAX_BODY {
        return error_reply(
            json_wanted,
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("cartridge body larger than {} bytes", MAX_BODY),
        );
    }

    let mut name = arg(&args, "name");
    let mut typ = arg(&args, "type");
    let mut compressor = arg(&args, "compressor");
    let repair = flag(&args, "repair");
    let launcher = arg(&args, "launcher");

    if !reference.is_empty() {
        let (n, t, c) = split_name_type_compressor(&reference);
        if name.is_empty() {
            name = n;
        }
        if typ.is_empty() {
            typ = t;
        }
        if compressor.is_empty() {
            compressor = c;
        }
    }

    let daemon = Arc::clone(&state.daemon);
    let repo_dir = state.repo_dir.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<String, (StatusCode, String)> {
        let input: Box<dyn Read> = if reference.is_empty() {
            Box::new(std::io::Cursor::new(body.to_vec()))
        } else {
            repo::resolve(&reference, repo_dir.as_deref())
                .map_err(|e| (StatusCode::NOT_ACCEPTABLE, e.to_string()))?
        };

        let reader = CartReader::new(input, &compressor)
            .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;
        if typ.is_empty() {
            typ = reader.file_type().to_string();
        }
        if name.is_empty() {
            name = reader.name().to_string();
        }

        let format = Format::from_type(&typ)
            .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;
        let params = Params {
            name: name.clone(),
            launcher,
        };
        let mut reader = reader;
        let cart = format
            .read(&mut reader, true, repair, &params)
            .map_err(|e| {
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    format!("cartridge corrupted: {}", e),
                )
            })?;

        daemon.set_cartridge(drive, cart, force).map_err(|e| {
            let status = match e {
                DaemonError::Busy(_) => StatusCode::LOCKED,
                DaemonError::Conflict(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, e.to_string())
        })?;
        info!("loaded data into drive {}", drive);
        Ok(format!("loaded data into drive {}\n", drive))
    })
    .await;

    match result {
        Err(e) => error_reply(json_wanted, StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        Ok(Err((status, msg))) => error_reply(json_wanted, status, msg),
        Ok(Ok(msg)) => reply(
            json_wanted,
            StatusCode::OK,
            &json!({ "drive": drive, "loaded": true }),
            msg,
        ),
    }
}

async fn get_map(State(state): State<Arc<ApiState>>, headers: HeaderMap) -> Response {
    let json_wanted = wants_json(&headers);
    let hw = state.daemon.hardware_drives();

    let mut text = if hw.is_off() {
        "no hardware drives\n".to_string()
    } else {
        format!(
            "hardware drives: start={}, end={}, shadowing={}\n",
            hw.start, hw.end, hw.shadowing
        )
    };
    if hw.locked {
        text = format!("{} (locked)\n", text.trim_end());
    }

    reply(
        json_wanted,
        StatusCode::OK,
        &json!({
            "start": hw.start,
            "end": hw.end,
            "locked": hw.locked,
            "shadowing": hw.shadowing,
        }),
        text,
    )
}

async fn put_map(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(args): Query<Args>,
) -> Response {
    let json_wanted = wants_json(&headers);
    let start = args.get("start").and_then(|v| v.parse::<usize>().ok());
    let end = args.get("end").and_then(|v| v.parse::<usize>().ok());
    let shadow = arg(&args, "shadow");

    if shadow.is_empty() {
        let (start, end) = match (start, end) {
            (Some(s), Some(e)) => (s, e),
            _ => {
                return error_reply(
                    json_wanted,
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "missing start or end drive".to_string(),
                )
            }
        };
        return match state.daemon.map_hardware_drives(start, end) {
            Ok(()) => reply(
                json_wanted,
                StatusCode::OK,
                &json!({ "start": start, "end": end }),
                format!("mapped hardware drives: start={}, end={}\n", start, end),
            ),
            Err(e) => daemon_error(json_wanted, e),
        };
    }

    if start.is_some() || end.is_some() {
        return error_reply(
            json_wanted,
            StatusCode::NOT_ACCEPTABLE,
            "don't set shadowing while setting drives".to_string(),
        );
    }

    let on = shadow == "true";
    match state.daemon.shadow_hardware_drives(on) {
        Ok(()) => reply(
            json_wanted,
            StatusCode::OK,
            &json!({ "shadowing": on }),
            format!(
                "switched hardware drive shadowing {}\n",
                if on { "on" } else { "off" }
            ),
        ),
        Err(e) => daemon_error(json_wanted, e),
    }
}

async fn search(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(args): Query<Args>,
) -> Response {
    let json_wanted = wants_json(&headers);
    let index = match &state.index {
        Some(ix) => ix,
        None => {
            return error_reply(
                json_wanted,
                StatusCode::SERVICE_UNAVAILABLE,
                "no search index".to_string(),
            )
        }
    };

    let term = arg(&args, "term");
    let items = args
        .get("items")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(DEFAULT_SEARCH_ITEMS);

    match index.search(&term, items) {
        Ok(result) => {
            let mut text = String::new();
            for hit in &result.hits {
                text.push_str(hit);
                text.push('\n');
            }
            text.push_str(&format!(
                "{} of {} shown\n",
                result.hits.len(),
                result.total
            ));
            reply(json_wanted, StatusCode::OK, &result, text)
        }
        Err(e) => error_reply(json_wanted, StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
    }
}

/// Serves the control API on `listen`.
pub async fn serve(state: Arc<ApiState>, listen: &str) -> std::io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!("control API listening on {}", listen);
    axum::serve(listener, app)
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_negotiation() {
        let mut headers = HeaderMap::new();
        assert!(!wants_json(&headers));
        headers.insert(header::ACCEPT, "application/json".parse().unwrap());
        assert!(wants_json(&headers));
        headers.insert(header::ACCEPT, "text/plain".parse().unwrap());
        assert!(!wants_json(&headers));
    }

    #[test]
    fn hexdump_format() {
        let dump = hexdump(b"ABC");
        assert!(dump.starts_with("00000000  41 42 43"));
        assert!(dump.trim_end().ends_with("ABC"));
    }
}
