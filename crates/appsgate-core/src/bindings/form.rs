/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

use std::collections::HashSet;

use crate::error::{MultiError, ProxyError};
use crate::model::{Field, Form, SelectOption};

fn clean_options(field: &str, options: Vec<SelectOption>, errs: &mut MultiError) -> Vec<SelectOption> {
    let mut labels = HashSet::new();
    let mut values = HashSet::new();
    let mut out = Vec::with_capacity(options.len());
    for opt in options {
        let label = if opt.label.is_empty() {
            opt.value.clone()
        } else {
            opt.label.clone()
        };
        if label.is_empty() {
            errs.push(format!("{field}: option with no label or value dropped"));
        } else if !labels.insert(label.clone()) {
            errs.push(format!("{field}: duplicate option label {label:?} dropped"));
        } else if !values.insert(opt.value.clone()) {
            errs.push(format!("{field}: duplicate option value {:?} dropped", opt.value));
        } else {
            out.push(SelectOption { label, ..opt });
        }
    }
    out
}

/// Drops unnamed and duplicate fields and select options. A form with
/// nothing to submit to is rejected outright.
pub fn clean_form(mut form: Form) -> Result<(Form, MultiError), ProxyError> {
    if form.submit.is_none() && form.source.is_none() {
        return Err(ProxyError::Upstream(
            "form has neither submit nor source".to_string(),
        ));
    }
    let mut errs = MultiError::new();
    let mut names = HashSet::new();
    let mut labels = HashSet::new();
    let mut fields: Vec<Field> = Vec::with_capacity(form.fields.len());
    for mut field in std::mem::take(&mut form.fields) {
        field.name = field.name.trim().to_string();
        if field.name.is_empty() {
            errs.push("field with no name dropped");
            continue;
        }
        if field.name.contains(char::is_whitespace) {
            errs.push(format!("{}: field name contains whitespace", field.name));
            continue;
        }
        if !names.insert(field.name.clone()) {
            errs.push(format!("{}: duplicate field name dropped", field.name));
            continue;
        }
        let label = field.effective_label().to_string();
        if !labels.insert(label.clone()) {
            errs.push(format!("{}: duplicate field label {label:?} dropped", field.name));
            continue;
        }
        field.options = clean_options(&field.name, std::mem::take(&mut field.options), &mut errs);
        fields.push(field);
    }
    form.fields = fields;
    Ok((form, errs))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::Call;

    fn field(name: &str, label: &str) -> Field {
        Field {
            name: name.into(),
            label: label.into(),
            ..Field::default()
        }
    }

    fn opt(label: &str, value: &str) -> SelectOption {
        SelectOption {
            label: label.into(),
            value: value.into(),
            ..SelectOption::default()
        }
    }

    #[test]
    fn test_requires_submit_or_source() {
        assert!(clean_form(Form::default()).is_err());
        let form = Form {
            source: Some(Call::new("/form")),
            ..Form::default()
        };
        assert!(clean_form(form).is_ok());
    }

    #[test]
    fn test_duplicate_fields_dropped() {
        let form = Form {
            submit: Some(Call::new("/submit")),
            fields: vec![
                field("channel", ""),
                field("channel", "Other"),
                field("user", "channel"),
                field("", "Nameless"),
                field("message", "Message"),
            ],
            ..Form::default()
        };
        let (form, errs) = clean_form(form).unwrap();
        let names: Vec<_> = form.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["channel", "message"]);
        assert_eq!(errs.len(), 3);
    }

    #[test]
    fn test_duplicate_options_dropped() {
        let mut f = field("color", "Color");
        f.options = vec![opt("Red", "red"), opt("Red", "crimson"), opt("Scarlet", "red"), opt("", "blue")];
        let form = Form {
            submit: Some(Call::new("/submit")),
            fields: vec![f],
            ..Form::default()
        };
        let (form, errs) = clean_form(form).unwrap();
        let labels: Vec<_> = form.fields[0].options.iter().map(|o| o.label.as_str()).collect();
        assert_eq!(labels, vec!["Red", "blue"]);
        assert_eq!(errs.len(), 2);
    }
}
