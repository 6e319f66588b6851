//! Per-scenario context
//!
//! Everything one scenario learns while it runs: its uniqueness token, the
//! references it created or resolved, and named values. Each scenario owns
//! its context; nothing here is shared between scenarios.

use std::collections::{BTreeMap, HashMap};

use crosscheck_common::{token, EntityRef};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{E2eError, E2eResult};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{\s*([A-Za-z0-9_.\-]+)\s*\}").expect("valid placeholder pattern"));

#[derive(Debug, Clone)]
pub struct ScenarioContext {
    pub run_id: Uuid,
    /// Uniqueness token, `${token}` in scenario values
    pub token: String,
    refs: HashMap<String, EntityRef>,
    vars: HashMap<String, String>,
}

impl Default for ScenarioContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ScenarioContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            token: token::fresh(),
            refs: HashMap::new(),
            vars: HashMap::new(),
        }
    }

    /// Bind a reference under an alias, replacing any earlier binding
    pub fn bind(&mut self, alias: impl Into<String>, entity: EntityRef) {
        self.refs.insert(alias.into(), entity);
    }

    pub fn get(&self, alias: &str) -> E2eResult<&EntityRef> {
        self.refs
            .get(alias)
            .ok_or_else(|| E2eError::UnknownAlias(alias.to_string()))
    }

    /// Optional parent lookup for steps that may have none
    pub fn get_opt(&self, alias: Option<&str>) -> E2eResult<Option<&EntityRef>> {
        alias.map(|alias| self.get(alias)).transpose()
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Replace `${token}`, `${run_id}`, `${var}`, `${alias.id}` and
    /// `${alias.field}` placeholders
    pub fn interpolate(&self, text: &str) -> E2eResult<String> {
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for caps in PLACEHOLDER.captures_iter(text) {
            let (Some(whole), Some(expr)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            out.push_str(&text[cursor..whole.start()]);
            out.push_str(&self.resolve(expr.as_str())?);
            cursor = whole.end();
        }
        out.push_str(&text[cursor..]);
        Ok(out)
    }

    fn resolve(&self, expr: &str) -> E2eResult<String> {
        match expr {
            "token" => return Ok(self.token.clone()),
            "run_id" => return Ok(self.run_id.to_string()),
            _ => {}
        }
        if let Some(value) = self.vars.get(expr) {
            return Ok(value.clone());
        }

        let (alias, field) = expr.split_once('.').unwrap_or((expr, "id"));
        let entity = self.get(alias)?;
        match field {
            "id" => Ok(entity.id().to_string()),
            "parent.id" => entity
                .parent()
                .map(|parent| parent.id().to_string())
                .ok_or_else(|| E2eError::UnknownAlias(expr.to_string())),
            field => entity
                .attribute(field)
                .map(str::to_string)
                .ok_or_else(|| E2eError::UnknownAlias(expr.to_string())),
        }
    }

    /// Interpolate every string inside a JSON value
    pub fn interpolate_value(&self, value: &Value) -> E2eResult<Value> {
        Ok(match value {
            Value::String(text) => Value::String(self.interpolate(text)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.interpolate_value(item))
                    .collect::<E2eResult<_>>()?,
            ),
            Value::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(key, item)| Ok((key.clone(), self.interpolate_value(item)?)))
                    .collect::<E2eResult<_>>()?,
            ),
            other => other.clone(),
        })
    }

    pub fn interpolate_fields(
        &self,
        fields: &BTreeMap<String, Value>,
    ) -> E2eResult<BTreeMap<String, Value>> {
        fields
            .iter()
            .map(|(name, value)| Ok((name.clone(), self.interpolate_value(value)?)))
            .collect()
    }
}
