// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use crate::{
    handlers::{Action, arity_error},
    resp::Resp,
    router::MAX_SLOT_NUM,
    session::{request::Request, session::ReaderState},
    utils::constant_time_eq,
};

pub(crate) fn handle_quit(s: &mut ReaderState, req: &Request) -> Action {
    s.quit = true;
    req.set_resp(Resp::ok());
    Action::Reply
}

pub(crate) fn handle_auth(s: &mut ReaderState, req: &Request) -> Action {
    if req.multi.len() != 2 {
        return arity_error(req);
    }
    let auth = s.core.auth();
    if auth.is_empty() {
        req.set_resp(Resp::error("ERR Client sent AUTH, but no password is set"));
        return Action::Reply;
    }
    if constant_time_eq(&req.multi[1], auth.as_bytes()) {
        s.authorized = true;
        req.set_resp(Resp::ok());
    } else {
        s.authorized = false;
        req.set_resp(Resp::error("ERR invalid password"));
    }
    Action::Reply
}

pub(crate) fn handle_select(req: &Request) -> Action {
    if req.multi.len() != 2 {
        return arity_error(req);
    }
    let db = std::str::from_utf8(&req.multi[1])
        .ok()
        .and_then(|s| s.parse::<i64>().ok());
    match db {
        Some(0) => req.set_resp(Resp::ok()),
        _ => req.set_resp(Resp::error("ERR invalid DB index, only accept DB 0")),
    }
    Action::Reply
}

/// PING/INFO. The bare form probes a pseudo-random slot derived from the
/// session clock so probe load spreads across the fleet; the address form
/// targets one backend, with the address argument stripped from the wire
/// command.
pub(crate) fn handle_probe(s: &ReaderState, req: &mut Request) -> Action {
    match req.multi.len() {
        1 => {
            let slot = s.core.now_ns().rem_euclid(MAX_SLOT_NUM as i64) as usize;
            Action::DispatchSlot(slot)
        },
        2 => {
            let addr = String::from_utf8_lossy(&req.multi[1]).into_owned();
            req.multi.truncate(1);
            Action::DispatchAddr(addr)
        },
        _ => arity_error(req),
    }
}
