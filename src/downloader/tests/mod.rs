use super::*;
use crate::downloader::test_helpers::*;
use crate::fetch::FetchResponse;
use crate::logging::LogLevel;
use crate::queue::AsyncHandoffQueue;
use futures::StreamExt;

mod batching;
mod single;
