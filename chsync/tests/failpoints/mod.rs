mod round_test;
