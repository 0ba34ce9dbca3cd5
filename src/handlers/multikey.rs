// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Scatter/gather for the multi-key commands.
//!
//! Each key (or key/value pair) becomes a sub-request sharing the parent's
//! batch and broken flag; the parent is never dispatched itself and instead
//! carries a coalesce reducer that the writer runs once every sub-request
//! has signaled. A single key degenerates to a plain hash-routed dispatch.

use std::sync::Arc;

use anyhow::{anyhow, bail};

use crate::{
    handlers::{Action, arity_error},
    resp::Resp,
    session::{
        request::{Coalesce, Request},
        session::SessionError,
    },
};

pub(crate) fn handle_mget(req: &mut Request) -> Action {
    let nkeys = req.multi.len() - 1;
    match nkeys {
        0 => arity_error(req),
        1 => Action::Dispatch,
        _ => {
            let mut subs = Vec::with_capacity(nkeys);
            for key in &req.multi[1..] {
                subs.push(Request::sub(
                    req,
                    vec![req.multi[0].clone(), key.clone()],
                ));
            }
            req.set_coalesce(mget_coalesce(subs.clone()));
            Action::Scatter(subs)
        },
    }
}

/// Every sub-response must be a one-element array; element 0 lands at the
/// sub-request's position in the parent array.
fn mget_coalesce(subs: Vec<Arc<Request>>) -> Coalesce {
    Box::new(move || {
        let mut array = Vec::with_capacity(subs.len());
        for sub in &subs {
            let (resp, err) = sub.take_outcome();
            if let Some(err) = err {
                return Err(err);
            }
            match resp {
                Some(Resp::Array(mut elems)) => {
                    if elems.len() != 1 {
                        bail!(
                            "bad response array length {} for 'MGET' command",
                            elems.len()
                        );
                    }
                    if let Some(elem) = elems.pop() {
                        array.push(elem);
                    }
                },
                Some(other) => {
                    bail!("bad response type {} for 'MGET' command", other.type_name())
                },
                None => return Err(anyhow::Error::new(SessionError::RespIsRequired)),
            }
        }
        Ok(Resp::Array(array))
    })
}

pub(crate) fn handle_mset(req: &mut Request) -> Action {
    let nblks = req.multi.len() - 1;
    if nblks == 0 || nblks % 2 != 0 {
        return arity_error(req);
    }
    if nblks == 2 {
        return Action::Dispatch;
    }
    let mut subs = Vec::with_capacity(nblks / 2);
    for pair in req.multi[1..].chunks_exact(2) {
        subs.push(Request::sub(
            req,
            vec![req.multi[0].clone(), pair[0].clone(), pair[1].clone()],
        ));
    }
    req.set_coalesce(mset_coalesce(subs.clone()));
    Action::Scatter(subs)
}

/// All sub-responses should be `+OK`; the last status seen wins.
fn mset_coalesce(subs: Vec<Arc<Request>>) -> Coalesce {
    Box::new(move || {
        let mut last = None;
        for sub in &subs {
            let (resp, err) = sub.take_outcome();
            if let Some(err) = err {
                return Err(err);
            }
            match resp {
                Some(status @ Resp::Status(_)) => last = Some(status),
                Some(other) => {
                    bail!("bad response type {} for 'MSET' command", other.type_name())
                },
                None => return Err(anyhow::Error::new(SessionError::RespIsRequired)),
            }
        }
        last.ok_or_else(|| anyhow!("no sub-responses for 'MSET' command"))
    })
}

pub(crate) fn handle_del(req: &mut Request) -> Action {
    let nkeys = req.multi.len() - 1;
    match nkeys {
        0 => arity_error(req),
        1 => Action::Dispatch,
        _ => {
            let mut subs = Vec::with_capacity(nkeys);
            for key in &req.multi[1..] {
                subs.push(Request::sub(
                    req,
                    vec![req.multi[0].clone(), key.clone()],
                ));
            }
            req.set_coalesce(del_coalesce(subs.clone()));
            Action::Scatter(subs)
        },
    }
}

/// Sums deletions across sub-requests; any non-zero integer counts one.
fn del_coalesce(subs: Vec<Arc<Request>>) -> Coalesce {
    Box::new(move || {
        let mut total = 0i64;
        for sub in &subs {
            let (resp, err) = sub.take_outcome();
            if let Some(err) = err {
                return Err(err);
            }
            match resp {
                Some(Resp::Int(v)) => {
                    if v != 0 {
                        total += 1;
                    }
                },
                Some(other) => {
                    bail!("bad response type {} for 'DEL' command", other.type_name())
                },
                None => return Err(anyhow::Error::new(SessionError::RespIsRequired)),
            }
        }
        Ok(Resp::Int(total))
    })
}
