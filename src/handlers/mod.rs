// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-command request handling.
//!
//! `handle_request` classifies a freshly decoded request, runs the matching
//! handler while the request is still exclusively owned by the reader, and
//! then performs whatever dispatch the handler asked for. Protocol and
//! argument problems (wrong arity, bad DB index, unknown address, refused
//! command, slot parse failure) answer in-band and keep the session alive;
//! only dispatch-time refusals from the router terminate the session.

/// AUTH/QUIT/SELECT/PING/INFO.
mod admin;
/// MGET/MSET/DEL scatter/gather.
mod multikey;
/// SLOTSINFO/SLOTSSCAN/SLOTSMAPPING.
mod slots;

/// Command classification table.
pub mod opinfo;

use std::sync::Arc;

use anyhow::Result;

use crate::{
    resp::Resp,
    router::Router,
    session::{request::Request, session::ReaderState},
};

/// What the reader should do with a request after its handler ran.
pub(crate) enum Action {
    /// The response was produced locally; enqueue as-is.
    Reply,
    /// Route by key hash.
    Dispatch,
    /// Route to a specific slot.
    DispatchSlot(usize),
    /// Route to a specific backend address.
    DispatchAddr(String),
    /// Sub-requests to dispatch independently; the parent carries their
    /// coalesce reducer.
    Scatter(Vec<Arc<Request>>),
}

pub(crate) fn handle_request(
    s: &mut ReaderState,
    r: &mut Arc<Request>,
    router: &Arc<dyn Router>,
) -> Result<()> {
    let action = {
        let req = Arc::get_mut(r).expect("request is exclusively owned before dispatch");
        classify(s, req, router.as_ref())?
    };
    match action {
        Action::Reply => Ok(()),
        Action::Dispatch => router.dispatch(Arc::clone(r)),
        Action::DispatchSlot(slot) => router.dispatch_slot(Arc::clone(r), slot),
        Action::DispatchAddr(addr) => {
            if !router.dispatch_addr(Arc::clone(r), &addr) {
                r.set_resp(Resp::error(
                    format!("ERR backend server '{addr}' not found").into_bytes(),
                ));
            }
            Ok(())
        },
        Action::Scatter(subs) => {
            for sub in subs {
                router.dispatch(sub)?;
            }
            Ok(())
        },
    }
}

fn classify(s: &mut ReaderState, req: &mut Request, router: &dyn Router) -> Result<Action> {
    let (op_str, op_flag) = opinfo::get_op_info(&req.multi)?;
    req.op_str = op_str;
    req.op_flag = op_flag;

    if req.op_flag.is_not_allowed() {
        req.set_resp(Resp::error(
            format!("ERR command '{}' is not allowed", req.op_str).into_bytes(),
        ));
        return Ok(Action::Reply);
    }

    // QUIT and AUTH are handled before the auth gate.
    match req.op_str.as_str() {
        "QUIT" => return Ok(admin::handle_quit(s, req)),
        "AUTH" => return Ok(admin::handle_auth(s, req)),
        _ => {},
    }

    if !s.authorized {
        if !s.core.auth().is_empty() {
            req.set_resp(Resp::error("NOAUTH Authentication required"));
            return Ok(Action::Reply);
        }
        s.authorized = true;
    }

    Ok(match req.op_str.as_str() {
        "SELECT" => admin::handle_select(req),
        "PING" | "INFO" => admin::handle_probe(s, req),
        "SLOTSINFO" => slots::handle_slots_info(req),
        "SLOTSSCAN" => slots::handle_slots_scan(req),
        "SLOTSMAPPING" => slots::handle_slots_mapping(req, router),
        "MGET" => multikey::handle_mget(req),
        "MSET" => multikey::handle_mset(req),
        "DEL" => multikey::handle_del(req),
        _ => Action::Dispatch,
    })
}

/// In-band reply for a wrong-arity command; the session continues.
fn arity_error(req: &Request) -> Action {
    req.set_resp(Resp::error(
        format!("ERR wrong number of arguments for '{}' command", req.op_str)
            .into_bytes(),
    ));
    Action::Reply
}
