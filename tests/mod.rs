mod dispatch_tests;
mod support;
mod topology_tests;
