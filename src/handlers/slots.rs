// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, bail};

use crate::{
    handlers::{Action, arity_error},
    resp::Resp,
    router::{MAX_SLOT_NUM, Router, Slot, slot_entry},
    session::request::Request,
};

pub(crate) fn handle_slots_info(req: &mut Request) -> Action {
    if req.multi.len() != 2 {
        return arity_error(req);
    }
    let addr = String::from_utf8_lossy(&req.multi[1]).into_owned();
    req.multi.truncate(1);
    Action::DispatchAddr(addr)
}

pub(crate) fn handle_slots_scan(req: &Request) -> Action {
    if req.multi.len() < 3 {
        return arity_error(req);
    }
    match parse_slot_id(&req.multi[1]) {
        Ok(slot) => Action::DispatchSlot(slot),
        Err(err) => {
            req.set_resp(Resp::error(
                format!(
                    "ERR parse slotnum '{}' failed, {err}",
                    String::from_utf8_lossy(&req.multi[1])
                )
                .into_bytes(),
            ));
            Action::Reply
        },
    }
}

/// Serialized locally from the router's slot table; never dispatched.
pub(crate) fn handle_slots_mapping(req: &Request, router: &dyn Router) -> Action {
    match req.multi.len() {
        1 => {
            let entries = router.get_slots().iter().map(Slot::to_resp).collect();
            req.set_resp(Resp::Array(entries));
        },
        2 => match parse_slot_id(&req.multi[1]) {
            Ok(id) => req.set_resp(slot_entry(router.get_slot(id).as_ref())),
            Err(err) => req.set_resp(Resp::error(
                format!(
                    "ERR parse slotnum '{}' failed, {err}",
                    String::from_utf8_lossy(&req.multi[1])
                )
                .into_bytes(),
            )),
        },
        _ => return arity_error(req),
    }
    Action::Reply
}

fn parse_slot_id(raw: &[u8]) -> Result<usize> {
    let slot = std::str::from_utf8(raw)?.parse::<usize>()?;
    if slot >= MAX_SLOT_NUM {
        bail!("slot out of range [0, {MAX_SLOT_NUM})");
    }
    Ok(slot)
}
