mod crawl_tests;
mod github_tests;
