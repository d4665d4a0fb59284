mod support;

mod streams;
