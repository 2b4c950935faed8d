mod sstable_tests;
