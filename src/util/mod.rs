mod utf8;

pub use utf8::Utf8Incrementor;
