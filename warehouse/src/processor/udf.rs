use common::Result;
use datafusion::arrow::array::{Array, Float64Array, StringArray};
use datafusion::arrow::datatypes::DataType;
use datafusion::common::DataFusionError;
use datafusion::execution::context::SessionContext;
use datafusion::logical_expr::ColumnarValue;
use datafusion::logical_expr::{Volatility, create_udf};
use std::sync::Arc;

use crate::hash;

/// Registers the natural-key hash UDF with the SessionContext. The same
/// function body backs both the location dimension build and the fact join,
/// so the two sides can never disagree on normalization.
pub fn register_udfs(ctx: &SessionContext) -> Result<()> {
    let location_hash = create_udf(
        "location_hash",
        vec![
            DataType::Utf8,    // street_address
            DataType::Utf8,    // city
            DataType::Utf8,    // zip_code
            DataType::Float64, // latitude
            DataType::Float64, // longitude
            DataType::Utf8,    // ward
        ],
        DataType::Utf8,
        Volatility::Immutable,
        Arc::new(|args| hash_locations(args).map_err(|e| DataFusionError::Internal(e.to_string()))),
    );

    ctx.register_udf(location_hash);

    Ok(())
}

fn string_arg<'a>(args: &'a [ColumnarValue], idx: usize) -> Result<&'a StringArray> {
    match &args[idx] {
        ColumnarValue::Array(array) => array
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| DataFusionError::Internal("Expected string array".to_string()).into()),
        ColumnarValue::Scalar(_) => {
            Err(DataFusionError::Internal("Scalar inputs not supported".to_string()).into())
        }
    }
}

fn float_arg<'a>(args: &'a [ColumnarValue], idx: usize) -> Result<&'a Float64Array> {
    match &args[idx] {
        ColumnarValue::Array(array) => array
            .as_any()
            .downcast_ref::<Float64Array>()
            .ok_or_else(|| DataFusionError::Internal("Expected float64 array".to_string()).into()),
        ColumnarValue::Scalar(_) => {
            Err(DataFusionError::Internal("Scalar inputs not supported".to_string()).into())
        }
    }
}

/// Computes the composite location hash row by row.
fn hash_locations(args: &[ColumnarValue]) -> Result<ColumnarValue> {
    let address = string_arg(args, 0)?;
    let city = string_arg(args, 1)?;
    let zip = string_arg(args, 2)?;
    let latitude = float_arg(args, 3)?;
    let longitude = float_arg(args, 4)?;
    let ward = string_arg(args, 5)?;

    let opt_str = |arr: &StringArray, i: usize| {
        if arr.is_null(i) {
            None
        } else {
            Some(arr.value(i).to_string())
        }
    };
    let opt_f64 = |arr: &Float64Array, i: usize| {
        if arr.is_null(i) { None } else { Some(arr.value(i)) }
    };

    let result: StringArray = (0..address.len())
        .map(|i| {
            Some(hash::location_hash(
                opt_str(address, i).as_deref(),
                opt_str(city, i).as_deref(),
                opt_str(zip, i).as_deref(),
                opt_f64(latitude, i),
                opt_f64(longitude, i),
                opt_str(ward, i).as_deref(),
            ))
        })
        .collect();

    Ok(ColumnarValue::Array(Arc::new(result)))
}
