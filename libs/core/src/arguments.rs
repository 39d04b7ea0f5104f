//! Typed call arguments.
//!
//! Every argument travels as its declared type name plus the codec-encoded
//! value. The server resolves methods by name and the list of declared type
//! names, never by inspecting the values themselves.

use std::any::type_name;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codec::Codec;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argument {
    pub type_name: String,
    pub value: Vec<u8>,
}

impl Argument {
    pub fn encode<T: Serialize, C: Codec>(value: &T, codec: &C) -> Result<Self> {
        Ok(Self {
            type_name: type_name::<T>().to_string(),
            value: codec.encode(value)?,
        })
    }
}

/// A parameter list that can cross the wire.
///
/// Implemented for `()` and tuples of up to eight serializable values.
pub trait Arguments: Sized + Send + 'static {
    /// Declared parameter types, in order.
    fn signature() -> Vec<String>;

    fn encode<C: Codec>(&self, codec: &C) -> Result<Vec<Argument>>;

    fn decode<C: Codec>(arguments: &[Argument], codec: &C) -> Result<Self>;
}

impl Arguments for () {
    fn signature() -> Vec<String> {
        Vec::new()
    }

    fn encode<C: Codec>(&self, _codec: &C) -> Result<Vec<Argument>> {
        Ok(Vec::new())
    }

    fn decode<C: Codec>(arguments: &[Argument], _codec: &C) -> Result<Self> {
        check_arity(arguments, 0)
    }
}

fn check_arity(arguments: &[Argument], expected: usize) -> Result<()> {
    if arguments.len() != expected {
        return Err(Error::Codec(format!(
            "expected {} arguments, got {}",
            expected,
            arguments.len()
        )));
    }
    Ok(())
}

macro_rules! impl_arguments {
    ($len:expr; $($name:ident : $idx:tt),+) => {
        impl<$($name),+> Arguments for ($($name,)+)
        where
            $($name: Serialize + DeserializeOwned + Send + 'static),+
        {
            fn signature() -> Vec<String> {
                vec![$(type_name::<$name>().to_string()),+]
            }

            fn encode<C: Codec>(&self, codec: &C) -> Result<Vec<Argument>> {
                Ok(vec![$(Argument::encode(&self.$idx, codec)?),+])
            }

            fn decode<C: Codec>(arguments: &[Argument], codec: &C) -> Result<Self> {
                check_arity(arguments, $len)?;
                Ok(($(codec.decode::<$name>(&arguments[$idx].value)?,)+))
            }
        }
    };
}

impl_arguments!(1; A: 0);
impl_arguments!(2; A: 0, B: 1);
impl_arguments!(3; A: 0, B: 1, D: 2);
impl_arguments!(4; A: 0, B: 1, D: 2, E: 3);
impl_arguments!(5; A: 0, B: 1, D: 2, E: 3, F: 4);
impl_arguments!(6; A: 0, B: 1, D: 2, E: 3, F: 4, G: 5);
impl_arguments!(7; A: 0, B: 1, D: 2, E: 3, F: 4, G: 5, H: 6);
impl_arguments!(8; A: 0, B: 1, D: 2, E: 3, F: 4, G: 5, H: 6, I: 7);
