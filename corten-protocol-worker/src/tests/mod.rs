mod dispatch_tests;
mod tools;
