/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Binding tree validation and merging.
//!
//! Each app's tree is cleaned on its own (grants, shape, icons, sibling
//! conflicts), then the survivors are merged under the three canonical
//! roots in app order. Conflicts always keep the first binding seen.

pub mod aggregate;
pub mod form;

use std::collections::{BTreeMap, HashSet};

use crate::error::MultiError;
use crate::expand::ExpandEnv;
use crate::model::{App, AppId, Binding, Location};

const WEBAPP_USER_AGENT: &str = "webapp";

/// Per-app inputs to cleaning.
pub(crate) struct CleanCtx<'a> {
    pub app: &'a App,
    pub env: &'a ExpandEnv,
    pub user_agent: &'a str,
}

enum Grant {
    /// The location and everything below it is granted.
    Whole,
    /// Something below the location is granted; check each child.
    Partial,
    None,
}

fn grant_for(app: &App, fql: &Location) -> Grant {
    if app.granted_locations.iter().any(|g| fql.is_within(g)) {
        Grant::Whole
    } else if app.granted_locations.iter().any(|g| g.is_within(fql)) {
        Grant::Partial
    } else {
        Grant::None
    }
}

fn is_root(fql: &Location) -> bool {
    Location::ROOTS.contains(&fql.as_str())
}

fn resolve_icon(ctx: &CleanCtx<'_>, icon: &str) -> String {
    if icon.is_empty() || icon.starts_with("http://") || icon.starts_with("https://") {
        return icon.to_string();
    }
    ctx.env
        .app_url(ctx.app.id(), &format!("/static/{}", icon.trim_start_matches('/')))
}

/// Sibling conflict tracking: first label and first (app, location) win.
#[derive(Default)]
struct Siblings {
    labels: HashSet<String>,
    locations: HashSet<(AppId, Location)>,
}

impl Siblings {
    fn admit(&mut self, parent: &Location, b: &Binding, errs: &mut MultiError) -> bool {
        if !b.label.is_empty() && self.labels.contains(&b.label) {
            errs.push(format!(
                "{}: duplicate label {:?}, binding dropped",
                parent.sub(b.location.as_str()),
                b.label
            ));
            return false;
        }
        let loc_key = (b.app_id.clone(), b.location.clone());
        if self.locations.contains(&loc_key) {
            errs.push(format!(
                "{}: duplicate location, binding dropped",
                parent.sub(b.location.as_str())
            ));
            return false;
        }
        if !b.label.is_empty() {
            self.labels.insert(b.label.clone());
        }
        self.locations.insert(loc_key);
        true
    }
}

fn clean_list(
    ctx: &CleanCtx<'_>,
    parent: &Location,
    bindings: Vec<Binding>,
    granted: bool,
    errs: &mut MultiError,
) -> Vec<Binding> {
    let mut siblings = Siblings::default();
    let mut out = Vec::with_capacity(bindings.len());
    for b in bindings {
        if let Some(b) = clean_one(ctx, parent, b, granted, errs) {
            if siblings.admit(parent, &b, errs) {
                out.push(b);
            }
        }
    }
    out
}

fn clean_one(
    ctx: &CleanCtx<'_>,
    parent: &Location,
    mut b: Binding,
    granted: bool,
    errs: &mut MultiError,
) -> Option<Binding> {
    b.label = b.label.trim().to_string();
    let location = b.location.as_str().trim().to_string();
    if b.label.is_empty() && location.is_empty() {
        errs.push(format!("{parent}: binding has neither label nor location"));
        return None;
    }
    let location = if location.is_empty() {
        b.label.clone()
    } else {
        location
    };
    let fql = parent.sub(&location);
    b.location = if parent.is_empty() {
        fql.clone()
    } else {
        Location::new(location.trim_matches('/'))
    };

    let granted = granted
        || match grant_for(ctx.app, &fql) {
            Grant::Whole => true,
            Grant::Partial => false,
            Grant::None => {
                errs.push(format!("{fql}: location is not granted"));
                return None;
            }
        };

    let root = is_root(&fql);
    if !root && fql.is_within(&Location::new(Location::COMMAND)) {
        if b.label.is_empty() {
            b.label = b.location.as_str().to_string();
        }
        if b.label.contains(char::is_whitespace) {
            errs.push(format!("{fql}: command label {:?} contains whitespace", b.label));
            return None;
        }
    }

    b.icon = resolve_icon(ctx, b.icon.trim());
    if !root
        && fql.root() == Some(Location::CHANNEL_HEADER)
        && b.icon.is_empty()
        && ctx.user_agent == WEBAPP_USER_AGENT
    {
        errs.push(format!("{fql}: channel header binding has no icon"));
        return None;
    }

    if !root {
        b.app_id = ctx.app.id().clone();
    }

    let kinds = usize::from(b.submit.is_some())
        + usize::from(b.form.is_some())
        + usize::from(!b.bindings.is_empty());
    if kinds != 1 || (root && b.bindings.is_empty()) {
        errs.push(format!(
            "{fql}: binding must have exactly one of submit, form or bindings"
        ));
        return None;
    }

    if !b.bindings.is_empty() {
        let children = std::mem::take(&mut b.bindings);
        b.bindings = clean_list(ctx, &fql, children, granted, errs);
        if b.bindings.is_empty() {
            return None;
        }
    }
    Some(b)
}

/// Cleans one app's top-level bindings. Returns the surviving roots and
/// everything that was dropped, as one error.
pub(crate) fn clean_app_bindings(ctx: &CleanCtx<'_>, bindings: Vec<Binding>) -> (Vec<Binding>, MultiError) {
    let mut errs = MultiError::new();
    let cleaned = clean_list(ctx, &Location::default(), bindings, false, &mut errs);
    (cleaned, errs)
}

/// Merges per-app cleaned roots, in app order, under the canonical roots.
/// Only non-empty roots are returned. Conflicts across apps are charged to
/// the app that lost.
pub(crate) fn merge(
    per_app: Vec<(AppId, Vec<Binding>)>,
    errors: &mut BTreeMap<AppId, MultiError>,
) -> Vec<Binding> {
    let mut out = Vec::new();
    for root in Location::ROOTS {
        let root_loc = Location::new(root);
        let mut siblings = Siblings::default();
        let mut children = Vec::new();
        for (app_id, bindings) in &per_app {
            let mut errs = MultiError::new();
            for b in bindings.iter().filter(|b| b.location == root_loc) {
                for child in &b.bindings {
                    if siblings.admit(&root_loc, child, &mut errs) {
                        children.push(child.clone());
                    }
                }
            }
            if !errs.is_empty() {
                errors.entry(app_id.clone()).or_default().extend(errs);
            }
        }
        if !children.is_empty() {
            out.push(Binding {
                bindings: children,
                ..Binding::root(root)
            });
        }
    }
    out
}
