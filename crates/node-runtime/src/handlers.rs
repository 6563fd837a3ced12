//! Route table and request handlers.

use crate::api;
use crate::context::DeviceContext;
use crate::http::{Request, Response};
use crate::pages;
use node_common::error::NodeResult;
use tracing::debug;

/// A route handler.
pub type Handler = fn(&Request, &mut DeviceContext) -> NodeResult<Response>;

/// Exact-path routes.
pub const ROUTES: &[(&str, Handler)] = &[
    ("/", index),
    ("/index.html", index),
    ("/r", set_relay),
    ("/a", set_all),
    ("/p", pulse),
    ("/api", status),
    ("/log", log),
];

/// Suffixes browsers ask for that the node never serves.
const STATIC_SUFFIXES: &[&str] = &[
    ".ico", ".js", ".css", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".map",
];

/// Parse `raw`, route it and run the handler. Unparseable requests, methods
/// other than GET, static assets and unknown paths get 404 without touching
/// any peripheral.
pub fn dispatch(raw: &[u8], ctx: &mut DeviceContext) -> NodeResult<Response> {
    let Some(request) = Request::parse(raw) else {
        debug!(len = raw.len(), "Unparseable request");
        return Ok(Response::not_found());
    };
    if request.method != "GET" || is_static_asset(&request.path) {
        return Ok(Response::not_found());
    }
    match ROUTES.iter().find(|(path, _)| *path == request.path) {
        Some((_, handler)) => handler(&request, ctx),
        None => Ok(Response::not_found()),
    }
}

fn is_static_asset(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    STATIC_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
}

/// `s=1` / `s=0`; anything else is invalid.
fn switch_param(request: &Request) -> Option<bool> {
    match request.param("s")? {
        "1" => Some(true),
        "0" => Some(false),
        _ => None,
    }
}

fn index(_request: &Request, ctx: &mut DeviceContext) -> NodeResult<Response> {
    let snapshot = ctx.snapshot()?;
    Ok(Response::html(pages::render_index(&snapshot, ctx.pulse_ms())))
}

fn set_relay(request: &Request, ctx: &mut DeviceContext) -> NodeResult<Response> {
    match (request.param_usize("n"), switch_param(request)) {
        (Some(n @ 1..=8), Some(on)) => ctx.set_relay(n, on)?,
        _ => debug!(query = ?request.query, "Ignoring invalid relay request"),
    }
    Ok(Response::redirect("/"))
}

fn set_all(request: &Request, ctx: &mut DeviceContext) -> NodeResult<Response> {
    match switch_param(request) {
        Some(on) => ctx.set_all(on)?,
        None => debug!(query = ?request.query, "Ignoring invalid all-relays request"),
    }
    Ok(Response::redirect("/"))
}

fn pulse(request: &Request, ctx: &mut DeviceContext) -> NodeResult<Response> {
    match request.param_usize("n") {
        Some(n @ 1..=8) => {
            ctx.pulse_relay(n)?;
        }
        _ => debug!(query = ?request.query, "Ignoring invalid pulse request"),
    }
    Ok(Response::redirect("/"))
}

fn status(_request: &Request, ctx: &mut DeviceContext) -> NodeResult<Response> {
    let snapshot = ctx.snapshot()?;
    Ok(Response::json(api::render(&snapshot)))
}

fn log(_request: &Request, ctx: &mut DeviceContext) -> NodeResult<Response> {
    let lines: Vec<String> = ctx
        .log()
        .tail(ctx.http_log_lines())
        .map(ToString::to_string)
        .collect();
    Ok(Response::text(lines.join("\n")))
}
