use std::collections::HashSet;

use lifecycle_core::error::{LifecycleError, LifecycleResult};
use lifecycle_core::templates::TemplateCatalog;

use crate::types::{Flow, StepConfig};

/// Reject malformed flow definitions before they can be enrolled into.
pub fn validate_flow(flow: &Flow, templates: &TemplateCatalog) -> LifecycleResult<()> {
    if flow.name.trim().is_empty() {
        return Err(LifecycleError::validation("flow name must not be empty"));
    }
    if flow.trigger_event.trim().is_empty() {
        return Err(LifecycleError::validation("flow trigger event must not be empty"));
    }
    if flow.steps.is_empty() {
        return Err(LifecycleError::validation("flow must have at least one step"));
    }
    if flow.delay_minutes.map_or(false, |m| m < 0) {
        return Err(LifecycleError::validation("flow delay must not be negative"));
    }
    if let Some(template_id) = flow.template_id {
        if !templates.contains(&template_id) {
            return Err(LifecycleError::not_found("Template", template_id));
        }
    }

    let mut seen = HashSet::new();
    for step in &flow.steps {
        if step.order == 0 {
            return Err(LifecycleError::validation("step orders are 1-based"));
        }
        if !seen.insert(step.order) {
            return Err(LifecycleError::validation(format!(
                "duplicate step order {}",
                step.order
            )));
        }
        match &step.config {
            StepConfig::Delay { minutes: Some(m) } if *m < 0 => {
                return Err(LifecycleError::validation(format!(
                    "step {} has a negative delay",
                    step.order
                )));
            }
            StepConfig::SendTemplate { template_id } => {
                let template_id = template_id.or(flow.template_id).ok_or_else(|| {
                    LifecycleError::validation(format!(
                        "step {} sends without a template",
                        step.order
                    ))
                })?;
                if !templates.contains(&template_id) {
                    return Err(LifecycleError::not_found("Template", template_id));
                }
            }
            StepConfig::Unknown => {
                return Err(LifecycleError::validation(format!(
                    "step {} has an unsupported type",
                    step.order
                )));
            }
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Step;
    use lifecycle_core::templates::EmailTemplate;

    fn catalog() -> (TemplateCatalog, uuid::Uuid) {
        let catalog = TemplateCatalog::new();
        let id = catalog.register(EmailTemplate::new("welcome", "Hi", "<p>Hi</p>"));
        (catalog, id)
    }

    #[test]
    fn test_valid_flow() {
        let (templates, id) = catalog();
        let flow = Flow::new(
            "Welcome",
            "signup",
            vec![
                Step::new(1, StepConfig::Trigger),
                Step::new(2, StepConfig::Delay { minutes: Some(45) }),
                Step::new(3, StepConfig::SendTemplate { template_id: Some(id) }),
            ],
        );
        assert!(validate_flow(&flow, &templates).is_ok());
    }

    #[test]
    fn test_rejects_duplicate_orders_and_negative_delay() {
        let (templates, _) = catalog();
        let dup = Flow::new(
            "f",
            "signup",
            vec![
                Step::new(1, StepConfig::Trigger),
                Step::new(1, StepConfig::Delay { minutes: Some(5) }),
            ],
        );
        assert!(matches!(
            validate_flow(&dup, &templates),
            Err(LifecycleError::Validation(_))
        ));

        let negative = Flow::new(
            "f",
            "signup",
            vec![Step::new(1, StepConfig::Delay { minutes: Some(-5) })],
        );
        assert!(validate_flow(&negative, &templates).is_err());
    }

    #[test]
    fn test_rejects_missing_template() {
        let (templates, _) = catalog();
        let flow = Flow::new(
            "f",
            "signup",
            vec![Step::new(1, StepConfig::SendTemplate { template_id: None })],
        );
        assert!(validate_flow(&flow, &templates).is_err());

        let unknown = Flow::new(
            "f",
            "signup",
            vec![Step::new(
                1,
                StepConfig::SendTemplate {
                    template_id: Some(uuid::Uuid::new_v4()),
                },
            )],
        );
        assert!(validate_flow(&unknown, &templates)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_rejects_empty_definitions() {
        let (templates, _) = catalog();
        assert!(validate_flow(&Flow::new("", "signup", vec![]), &templates).is_err());
        assert!(validate_flow(
            &Flow::new("f", " ", vec![Step::new(1, StepConfig::Trigger)]),
            &templates
        )
        .is_err());
        assert!(validate_flow(&Flow::new("f", "signup", vec![]), &templates).is_err());
    }
}
