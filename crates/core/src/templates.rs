//! Email template catalog with `{{variable}}` substitution.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{LifecycleError, LifecycleResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailTemplate {
    pub id: Uuid,
    pub name: String,
    pub subject: String,
    pub html: String,
    pub variables: Vec<TemplateVariable>,
    pub created_at: DateTime<Utc>,
}

impl EmailTemplate {
    pub fn new(
        name: impl Into<String>,
        subject: impl Into<String>,
        html: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            subject: subject.into(),
            html: html.into(),
            variables: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// A declared placeholder and the value used when the caller supplies none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateVariable {
    pub name: String,
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub template_id: Uuid,
    pub subject: String,
    pub html: String,
}

/// Shared catalog of email templates referenced by flows.
#[derive(Default)]
pub struct TemplateCatalog {
    templates: DashMap<Uuid, EmailTemplate>,
}

impl TemplateCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, template: EmailTemplate) -> Uuid {
        let id = template.id;
        self.templates.insert(id, template);
        id
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.templates.contains_key(id)
    }

    pub fn get(&self, id: &Uuid) -> Option<EmailTemplate> {
        self.templates.get(id).map(|t| t.clone())
    }

    pub fn remove(&self, id: &Uuid) -> Option<EmailTemplate> {
        self.templates.remove(id).map(|(_, t)| t)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Render subject and body. Supplied variables win over declared
    /// defaults; unknown placeholders are left untouched.
    pub fn render(
        &self,
        template_id: &Uuid,
        variables: &HashMap<String, String>,
    ) -> LifecycleResult<RenderedEmail> {
        let template = self
            .templates
            .get(template_id)
            .ok_or_else(|| LifecycleError::not_found("Template", template_id))?;

        let mut values: HashMap<&str, &str> = HashMap::new();
        for var in &template.variables {
            if let Some(default) = &var.default_value {
                values.insert(var.name.as_str(), default.as_str());
            }
        }
        for (name, value) in variables {
            values.insert(name.as_str(), value.as_str());
        }

        Ok(RenderedEmail {
            template_id: *template_id,
            subject: substitute(&template.subject, &values),
            html: substitute(&template.html, &values),
        })
    }
}

/// Single left-to-right pass; inserted values are never re-scanned, so a
/// value containing `{{name}}` is emitted verbatim.
fn substitute(template_str: &str, values: &HashMap<&str, &str>) -> String {
    let mut out = String::with_capacity(template_str.len());
    let mut rest = template_str;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..end];
        if name.contains("{{") {
            // Stray opening braces; restart the scan at the inner one.
            out.push_str("{{");
            rest = after;
            continue;
        }
        match values.get(name) {
            Some(value) => out.push_str(value),
            None => {
                out.push_str("{{");
                out.push_str(name);
                out.push_str("}}");
            }
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_with_defaults() {
        let catalog = TemplateCatalog::new();
        let mut template = EmailTemplate::new(
            "welcome",
            "Welcome, {{first_name}}",
            "<p>Hello {{first_name}} ({{email}})</p>",
        );
        template.variables.push(TemplateVariable {
            name: "first_name".into(),
            default_value: Some("there".into()),
        });
        let id = catalog.register(template);

        let mut vars = HashMap::new();
        vars.insert("email".to_string(), "a@example.com".to_string());
        let rendered = catalog.render(&id, &vars).unwrap();
        assert_eq!(rendered.subject, "Welcome, there");
        assert_eq!(rendered.html, "<p>Hello there (a@example.com)</p>");

        vars.insert("first_name".to_string(), "Ada".to_string());
        let rendered = catalog.render(&id, &vars).unwrap();
        assert_eq!(rendered.subject, "Welcome, Ada");
    }

    #[test]
    fn test_render_does_not_expand_inserted_values() {
        let catalog = TemplateCatalog::new();
        let id = catalog.register(EmailTemplate::new(
            "nested",
            "{{a}}|{{b}}",
            "{{a}}|{{b}}|{{missing}}|{{ {{b}}|{{open",
        ));
        let mut vars = HashMap::new();
        vars.insert("a".to_string(), "{{b}}".to_string());
        vars.insert("b".to_string(), "x".to_string());

        for _ in 0..50 {
            let rendered = catalog.render(&id, &vars).unwrap();
            assert_eq!(rendered.subject, "{{b}}|x");
            assert_eq!(rendered.html, "{{b}}|x|{{missing}}|{{ x|{{open");
        }
    }

    #[test]
    fn test_render_unknown_template() {
        let catalog = TemplateCatalog::new();
        let err = catalog.render(&Uuid::new_v4(), &HashMap::new()).unwrap_err();
        assert!(err.is_not_found());
    }
}
