/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Declarative command trees for builtin apps.

use crate::model::{Binding, Call, ExpandedContext, Form, Location};

#[derive(Clone, Debug, Default)]
pub struct BindableConfig {
    pub name: String,
    pub description: String,
    pub hint: String,
    pub icon: String,
    /// Hidden from users who are not system admins.
    pub admin_only: bool,
}

impl BindableConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn description(mut self, d: impl Into<String>) -> Self {
        self.description = d.into();
        self
    }

    #[must_use]
    pub fn hint(mut self, h: impl Into<String>) -> Self {
        self.hint = h.into();
        self
    }

    #[must_use]
    pub fn admin_only(mut self) -> Self {
        self.admin_only = true;
        self
    }

    fn visible(&self, ctx: &ExpandedContext) -> bool {
        !self.admin_only || ctx.acting_user.as_ref().is_some_and(|u| u.is_system_admin())
    }

    fn binding(&self) -> Binding {
        Binding {
            location: Location::new(self.name.as_str()),
            label: self.name.clone(),
            hint: self.hint.clone(),
            description: self.description.clone(),
            icon: self.icon.clone(),
            ..Binding::default()
        }
    }
}

#[derive(Clone, Debug)]
pub enum Leaf {
    Action { config: BindableConfig, submit: Call },
    Form { config: BindableConfig, form: Form },
}

#[derive(Clone, Debug)]
pub enum Bindable {
    Leaf(Leaf),
    Multi {
        config: BindableConfig,
        children: Vec<Bindable>,
    },
}

impl Bindable {
    #[must_use]
    pub fn action(config: BindableConfig, submit: Call) -> Self {
        Self::Leaf(Leaf::Action { config, submit })
    }

    #[must_use]
    pub fn form(config: BindableConfig, form: Form) -> Self {
        Self::Leaf(Leaf::Form { config, form })
    }

    #[must_use]
    pub fn multi(config: BindableConfig, children: Vec<Bindable>) -> Self {
        Self::Multi { config, children }
    }

    /// The binding this node renders to for `ctx`, or `None` when hidden
    /// (admin-only for a non-admin, or a group with nothing visible).
    #[must_use]
    pub fn to_binding(&self, ctx: &ExpandedContext) -> Option<Binding> {
        match self {
            Self::Leaf(Leaf::Action { config, submit }) => config.visible(ctx).then(|| Binding {
                submit: Some(submit.clone()),
                ..config.binding()
            }),
            Self::Leaf(Leaf::Form { config, form }) => config.visible(ctx).then(|| Binding {
                form: Some(form.clone()),
                ..config.binding()
            }),
            Self::Multi { config, children } => {
                if !config.visible(ctx) {
                    return None;
                }
                let bindings: Vec<Binding> =
                    children.iter().filter_map(|c| c.to_binding(ctx)).collect();
                (!bindings.is_empty()).then(|| Binding {
                    bindings,
                    ..config.binding()
                })
            }
        }
    }
}
