use super::consumer::RowProcessingConsumer;
use crate::error::{EngineError, Result};
use std::collections::HashSet;

/// Reorder consumers so every consumer comes after the producers of its
/// input columns and the filter it requires
///
/// Stable: among ready consumers the declaration order is kept. On error the
/// vector still holds every consumer, in unspecified order.
pub(super) fn order_consumers(
    consumers: &mut Vec<RowProcessingConsumer>,
    source_columns: &[String],
) -> Result<()> {
    let mut remaining = std::mem::take(consumers);
    let mut available: HashSet<String> = source_columns.iter().cloned().collect();
    let mut placed: HashSet<String> = HashSet::new();

    while !remaining.is_empty() {
        let ready = remaining.iter().position(|c| {
            c.input_columns().iter().all(|col| available.contains(col))
                && c.requirement().is_none_or(|r| placed.contains(&r.component))
        });

        match ready {
            Some(index) => {
                let consumer = remaining.remove(index);
                available.extend(consumer.output_columns().iter().cloned());
                placed.insert(consumer.key().to_string());
                consumers.push(consumer);
            },
            None => {
                let error = stuck(&remaining, &available);
                consumers.append(&mut remaining);
                return Err(error);
            },
        }
    }
    Ok(())
}

fn stuck(remaining: &[RowProcessingConsumer], available: &HashSet<String>) -> EngineError {
    let producible: HashSet<&str> = available
        .iter()
        .map(String::as_str)
        .chain(remaining.iter().flat_map(|c| c.output_columns().iter().map(String::as_str)))
        .collect();

    for consumer in remaining {
        if let Some(column) = consumer
            .input_columns()
            .iter()
            .find(|col| !producible.contains(col.as_str()))
        {
            return EngineError::configuration(
                consumer.key(),
                format!("input column '{}' is not available", column),
            );
        }
    }

    let keys: Vec<&str> = remaining.iter().map(|c| c.key()).collect();
    EngineError::configuration(
        keys.first().copied().unwrap_or_default(),
        format!("circular dependency between components {}", keys.join(", ")),
    )
}
