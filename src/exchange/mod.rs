//! Exchanges execute trades against an input's price history. An exchange value is an immutable
//! snapshot: operations that would change it return a new value and leave the receiver intact, so
//! every state a caller has ever held stays valid and readable.
pub mod barra_v1;
