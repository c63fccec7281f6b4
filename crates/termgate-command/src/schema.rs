//! Parameter schemas and typed argument values.
//!
//! Schemas are declared explicitly at registration time, never inferred
//! from handler signatures. A schema is an ordered sequence of [`Param`]s;
//! once the command is registered the schema is immutable.

use termgate_core::{Error, Result};

/// Declared type of a command parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamType {
    /// Signed integer
    Int,
    /// Floating point number
    Float,
    /// Boolean; as a flag, presence alone means true
    Bool,
    /// Free-form string
    Str,
    /// One of a fixed set of choices
    Choice(Vec<String>),
    /// Zero or more values of the element type, accumulated
    List(Box<ParamType>),
}

impl ParamType {
    /// Human name used in error messages.
    pub fn expected_name(&self) -> &'static str {
        match self {
            ParamType::Int => "integer",
            ParamType::Float => "float",
            ParamType::Bool => "boolean",
            ParamType::Str => "string",
            ParamType::Choice(_) => "one of the listed choices",
            ParamType::List(_) => "list",
        }
    }
}

/// A typed argument value bound from an input token.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }
}

/// Coerce one token to the declared type.
///
/// `parameter` is only used to name the offender in the error.
pub fn coerce(parameter: &str, token: &str, ty: &ParamType) -> Result<Value> {
    let fail = || Error::Argument {
        parameter: parameter.to_string(),
        expected: ty.expected_name(),
        value: token.to_string(),
    };
    match ty {
        ParamType::Int => token.parse::<i64>().map(Value::Int).map_err(|_| fail()),
        ParamType::Float => token.parse::<f64>().map(Value::Float).map_err(|_| fail()),
        ParamType::Bool => match token {
            "true" | "yes" | "on" | "1" => Ok(Value::Bool(true)),
            "false" | "no" | "off" | "0" => Ok(Value::Bool(false)),
            _ => Err(fail()),
        },
        ParamType::Str => Ok(Value::Str(token.to_string())),
        ParamType::Choice(choices) => {
            if choices.iter().any(|c| c == token) {
                Ok(Value::Str(token.to_string()))
            } else {
                Err(Error::Argument {
                    parameter: parameter.to_string(),
                    expected: ty.expected_name(),
                    value: token.to_string(),
                })
            }
        }
        ParamType::List(elem) => Ok(Value::List(vec![coerce(parameter, token, elem)?])),
    }
}

/// One declared command parameter.
#[derive(Debug, Clone)]
pub struct Param {
    /// Parameter name; also the flag name (`--name`)
    pub name: String,
    /// Declared type
    pub ty: ParamType,
    /// Whether binding must produce a value for this parameter
    pub required: bool,
    /// Value used when the parameter is left unbound
    pub default: Option<Value>,
    /// One-line description shown in help
    pub help: String,
}

impl Param {
    /// A required positional parameter.
    pub fn required(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
            default: None,
            help: String::new(),
        }
    }

    /// An optional parameter.
    pub fn optional(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: false,
            default: None,
            help: String::new(),
        }
    }

    /// Value to bind when the parameter is not supplied.
    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self.required = false;
        self
    }

    /// One-line description shown in help.
    pub fn help(mut self, text: impl Into<String>) -> Self {
        self.help = text.into();
        self
    }
}
