mod convert;
mod lower;
