//! Parse non-geometry property values into Arrow arrays

use std::sync::Arc;

use arrow_array::builder::{
    BinaryBuilder, BooleanBuilder, Float32Builder, Float64Builder, Int16Builder, Int32Builder,
    Int64Builder, Int8Builder, StringBuilder, UInt16Builder, UInt32Builder, UInt64Builder,
    UInt8Builder,
};
use arrow_array::ArrayRef;
use arrow_schema::DataType;
use flatgeobuf::ColumnType;
use geozero::ColumnValue;

// Types implemented by FlatGeobuf
pub(crate) enum AnyBuilder {
    Bool(BooleanBuilder),
    Int8(Int8Builder),
    UInt8(UInt8Builder),
    Int16(Int16Builder),
    UInt16(UInt16Builder),
    Int32(Int32Builder),
    UInt32(UInt32Builder),
    Int64(Int64Builder),
    UInt64(UInt64Builder),
    Float32(Float32Builder),
    Float64(Float64Builder),
    // Json and DateTime columns are kept as text
    String(StringBuilder),
    Binary(BinaryBuilder),
}

impl AnyBuilder {
    /// A builder for a FlatGeobuf column type, or `None` for types this crate doesn't read.
    pub fn for_column_type(column_type: ColumnType, capacity: usize) -> Option<Self> {
        let builder = match column_type {
            ColumnType::Bool => AnyBuilder::Bool(BooleanBuilder::with_capacity(capacity)),
            ColumnType::Byte => AnyBuilder::Int8(Int8Builder::with_capacity(capacity)),
            ColumnType::UByte => AnyBuilder::UInt8(UInt8Builder::with_capacity(capacity)),
            ColumnType::Short => AnyBuilder::Int16(Int16Builder::with_capacity(capacity)),
            ColumnType::UShort => AnyBuilder::UInt16(UInt16Builder::with_capacity(capacity)),
            ColumnType::Int => AnyBuilder::Int32(Int32Builder::with_capacity(capacity)),
            ColumnType::UInt => AnyBuilder::UInt32(UInt32Builder::with_capacity(capacity)),
            ColumnType::Long => AnyBuilder::Int64(Int64Builder::with_capacity(capacity)),
            ColumnType::ULong => AnyBuilder::UInt64(UInt64Builder::with_capacity(capacity)),
            ColumnType::Float => AnyBuilder::Float32(Float32Builder::with_capacity(capacity)),
            ColumnType::Double => AnyBuilder::Float64(Float64Builder::with_capacity(capacity)),
            ColumnType::String | ColumnType::Json | ColumnType::DateTime => {
                AnyBuilder::String(StringBuilder::with_capacity(capacity, capacity * 8))
            }
            ColumnType::Binary => {
                AnyBuilder::Binary(BinaryBuilder::with_capacity(capacity, capacity * 8))
            }
            // ColumnType is actually a struct, not an enum, so the rust compiler doesn't know
            // we've matched all types
            _ => return None,
        };
        Some(builder)
    }

    pub fn data_type(&self) -> DataType {
        match self {
            AnyBuilder::Bool(_) => DataType::Boolean,
            AnyBuilder::Int8(_) => DataType::Int8,
            AnyBuilder::UInt8(_) => DataType::UInt8,
            AnyBuilder::Int16(_) => DataType::Int16,
            AnyBuilder::UInt16(_) => DataType::UInt16,
            AnyBuilder::Int32(_) => DataType::Int32,
            AnyBuilder::UInt32(_) => DataType::UInt32,
            AnyBuilder::Int64(_) => DataType::Int64,
            AnyBuilder::UInt64(_) => DataType::UInt64,
            AnyBuilder::Float32(_) => DataType::Float32,
            AnyBuilder::Float64(_) => DataType::Float64,
            AnyBuilder::String(_) => DataType::Utf8,
            AnyBuilder::Binary(_) => DataType::Binary,
        }
    }

    /// Append a value. A value of the wrong type is stored as null and `false` is returned.
    pub fn add_value(&mut self, value: &ColumnValue) -> bool {
        match (self, value) {
            (AnyBuilder::Bool(b), ColumnValue::Bool(v)) => b.append_value(*v),
            (AnyBuilder::Int8(b), ColumnValue::Byte(v)) => b.append_value(*v),
            (AnyBuilder::UInt8(b), ColumnValue::UByte(v)) => b.append_value(*v),
            (AnyBuilder::Int16(b), ColumnValue::Short(v)) => b.append_value(*v),
            (AnyBuilder::UInt16(b), ColumnValue::UShort(v)) => b.append_value(*v),
            (AnyBuilder::Int32(b), ColumnValue::Int(v)) => b.append_value(*v),
            (AnyBuilder::UInt32(b), ColumnValue::UInt(v)) => b.append_value(*v),
            (AnyBuilder::Int64(b), ColumnValue::Long(v)) => b.append_value(*v),
            (AnyBuilder::UInt64(b), ColumnValue::ULong(v)) => b.append_value(*v),
            (AnyBuilder::Float32(b), ColumnValue::Float(v)) => b.append_value(*v),
            (AnyBuilder::Float64(b), ColumnValue::Double(v)) => b.append_value(*v),
            (AnyBuilder::String(b), ColumnValue::String(v))
            | (AnyBuilder::String(b), ColumnValue::Json(v))
            | (AnyBuilder::String(b), ColumnValue::DateTime(v)) => b.append_value(v),
            (AnyBuilder::Binary(b), ColumnValue::Binary(v)) => b.append_value(v),
            (builder, _) => {
                builder.append_null();
                return false;
            }
        }
        true
    }

    pub fn append_null(&mut self) {
        match self {
            AnyBuilder::Bool(b) => b.append_null(),
            AnyBuilder::Int8(b) => b.append_null(),
            AnyBuilder::UInt8(b) => b.append_null(),
            AnyBuilder::Int16(b) => b.append_null(),
            AnyBuilder::UInt16(b) => b.append_null(),
            AnyBuilder::Int32(b) => b.append_null(),
            AnyBuilder::UInt32(b) => b.append_null(),
            AnyBuilder::Int64(b) => b.append_null(),
            AnyBuilder::UInt64(b) => b.append_null(),
            AnyBuilder::Float32(b) => b.append_null(),
            AnyBuilder::Float64(b) => b.append_null(),
            AnyBuilder::String(b) => b.append_null(),
            AnyBuilder::Binary(b) => b.append_null(),
        }
    }

    /// Take the values appended so far, leaving the builder empty.
    pub fn finish(&mut self) -> ArrayRef {
        match self {
            AnyBuilder::Bool(b) => Arc::new(b.finish()),
            AnyBuilder::Int8(b) => Arc::new(b.finish()),
            AnyBuilder::UInt8(b) => Arc::new(b.finish()),
            AnyBuilder::Int16(b) => Arc::new(b.finish()),
            AnyBuilder::UInt16(b) => Arc::new(b.finish()),
            AnyBuilder::Int32(b) => Arc::new(b.finish()),
            AnyBuilder::UInt32(b) => Arc::new(b.finish()),
            AnyBuilder::Int64(b) => Arc::new(b.finish()),
            AnyBuilder::UInt64(b) => Arc::new(b.finish()),
            AnyBuilder::Float32(b) => Arc::new(b.finish()),
            AnyBuilder::Float64(b) => Arc::new(b.finish()),
            AnyBuilder::String(b) => Arc::new(b.finish()),
            AnyBuilder::Binary(b) => Arc::new(b.finish()),
        }
    }
}

/// The FlatGeobuf column type used to store an Arrow type, or `None` if it must be cast to text.
pub(crate) fn column_type_for(data_type: &DataType) -> Option<ColumnType> {
    let column_type = match data_type {
        DataType::Boolean => ColumnType::Bool,
        DataType::Int8 => ColumnType::Byte,
        DataType::UInt8 => ColumnType::UByte,
        DataType::Int16 => ColumnType::Short,
        DataType::UInt16 => ColumnType::UShort,
        DataType::Int32 => ColumnType::Int,
        DataType::UInt32 => ColumnType::UInt,
        DataType::Int64 => ColumnType::Long,
        DataType::UInt64 => ColumnType::ULong,
        DataType::Float32 => ColumnType::Float,
        DataType::Float64 => ColumnType::Double,
        DataType::Utf8 => ColumnType::String,
        DataType::Binary => ColumnType::Binary,
        _ => return None,
    };
    Some(column_type)
}
