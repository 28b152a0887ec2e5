mod cli;
mod properties;
mod scenarios;
