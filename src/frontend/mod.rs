pub mod token_dumper;
