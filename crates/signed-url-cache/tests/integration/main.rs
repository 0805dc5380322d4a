mod scenarios;
mod storage;
