//! Built-in components
//!
//! | descriptor           | kind        | result             |
//! |----------------------|-------------|--------------------|
//! | `concat`             | transformer |                    |
//! | `token-stream`       | transformer | stream `tokens`    |
//! | `not-null`           | filter      |                    |
//! | `row-count`          | analyzer    | number             |
//! | `value-distribution` | analyzer    | value distribution |
//! | `crosstab`           | analyzer    | crosstab           |
//! | `first-value`        | analyzer    | text, single node  |

mod concat;
mod crosstab;
mod first_value;
mod not_null;
mod row_count;
mod token_stream;
mod value_distribution;

pub use concat::Concat;
pub use crosstab::Crosstab;
pub use first_value::FirstValue;
pub use not_null::NotNull;
pub use row_count::RowCount;
pub use token_stream::TokenStream;
pub use value_distribution::ValueDistribution;

use crate::descriptor::DescriptorRegistry;
use crate::job::PropertyValue;

pub fn register_all(registry: &mut DescriptorRegistry) {
    registry
        .register(concat::descriptor())
        .register(token_stream::descriptor())
        .register(not_null::descriptor())
        .register(row_count::descriptor())
        .register(value_distribution::descriptor())
        .register(crosstab::descriptor())
        .register(first_value::descriptor());
}

fn string_property(value: Option<PropertyValue>) -> Option<String> {
    value.and_then(|v| v.as_str().map(str::to_string))
}
